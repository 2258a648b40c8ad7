//! 检测事件日志 (CSV, 只追加)
//!
//! 列: Timestamp, ROI, Event, Confidence

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::occupancy::DetectionEvent;

pub const CSV_HEADER: &str = "Timestamp,ROI,Event,Confidence";

/// 事件落盘接口; 写入失败由调用方记录告警, 不影响检测
pub trait EventSink: Send {
    fn append(&mut self, event: &DetectionEvent) -> io::Result<()>;
}

pub struct CsvEventLog {
    path: PathBuf,
}

impl CsvEventLog {
    /// 文件不存在时写入表头
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, format!("{}\n", CSV_HEADER))?;
            info!("📝 创建事件日志: {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 一行CSV; 置信度缺省时留空
pub fn format_row(event: &DetectionEvent) -> String {
    let confidence = event
        .confidence
        .map(|c| format!("{:.4}", c))
        .unwrap_or_default();
    format!(
        "{},{},{},{}",
        event.timestamp_string(),
        event.roi_label(),
        event.kind,
        confidence
    )
}

impl EventSink for CsvEventLog {
    fn append(&mut self, event: &DetectionEvent) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", format_row(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::EventKind;
    use chrono::{Local, TimeZone};

    fn event(kind: EventKind, confidence: Option<f32>) -> DetectionEvent {
        DetectionEvent {
            timestamp: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            roi_index: 1,
            kind,
            confidence,
        }
    }

    #[test]
    fn test_format_row() {
        assert_eq!(
            format_row(&event(EventKind::AlertTriggered, Some(0.87654))),
            "2024-03-09 14:05:07,ROI 2,Alert Triggered,0.8765"
        );
        assert_eq!(
            format_row(&event(EventKind::Left, None)),
            "2024-03-09 14:05:07,ROI 2,Person Left,"
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/detection_log.csv");

        let mut log = CsvEventLog::open(&path).unwrap();
        log.append(&event(EventKind::Entered, Some(0.5))).unwrap();
        // 重新打开不会重复写表头
        let mut log = CsvEventLog::open(&path).unwrap();
        log.append(&event(EventKind::Left, None)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with("Person Entered,0.5000"));
        assert!(lines[2].ends_with("Person Left,"));
    }
}
