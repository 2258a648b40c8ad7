//! 邮件告警: 正文 + 证据帧附件
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::EmailConfig;
use crate::detection::types::Frame;
use crate::error::NotifyError;
use crate::roi::roi_label;

const JPEG_QUALITY: u8 = 90;

#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

/// 待发送的告警邮件 (与传输方式无关)
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEmail {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl AlertEmail {
    /// 组装邮件; JPEG编码在通知线程中完成
    pub fn compose(
        roi_index: usize,
        at: DateTime<Local>,
        frames: &[Frame],
    ) -> Result<Self, NotifyError> {
        let label = roi_label(roi_index);
        let body = format!(
            "Person detected in {} at {}\n\nAttached are {} frames captured during the alert.",
            label,
            at.format("%Y-%m-%d %H:%M:%S"),
            frames.len()
        );

        let attachments = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                Ok(Attachment {
                    filename: format!("alert_frame_{}.jpg", i + 1),
                    content_type: "image/jpeg",
                    data: encode_jpeg(frame)?,
                })
            })
            .collect::<Result<Vec<_>, NotifyError>>()?;

        Ok(Self {
            subject: format!("Alert: Person Detected in {}", label),
            body,
            attachments,
        })
    }
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, NotifyError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(frame)?;
    Ok(buf)
}

/// 邮件传输接口
pub trait MailTransport: Send + Sync {
    fn send(&self, config: &EmailConfig, email: &AlertEmail) -> Result<(), NotifyError>;
}

/// SMTP (STARTTLS) 发送, 使用发件人账号登录
#[derive(Clone, Copy, Debug, Default)]
pub struct SmtpMailer;

fn transport_err(e: impl std::fmt::Display) -> NotifyError {
    NotifyError::Transport(e.to_string())
}

impl MailTransport for SmtpMailer {
    fn send(&self, config: &EmailConfig, email: &AlertEmail) -> Result<(), NotifyError> {
        let from: Mailbox = config.sender_email.parse().map_err(transport_err)?;
        let to: Mailbox = config.recipient_email.parse().map_err(transport_err)?;

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
        for attachment in &email.attachments {
            let content_type = ContentType::parse(attachment.content_type).map_err(transport_err)?;
            parts = parts.singlepart(
                MailAttachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .multipart(parts)
            .map_err(transport_err)?;

        let mailer = SmtpTransport::starttls_relay(&config.smtp_server)
            .map_err(transport_err)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender_email.clone(),
                config.sender_password.clone(),
            ))
            .build();

        mailer.send(&message).map_err(transport_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgb;
    use std::sync::Arc;

    #[test]
    fn test_compose_alert_email() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let frames: Vec<Frame> = (0..3)
            .map(|_| Arc::new(RgbImage::from_pixel(16, 16, Rgb([10, 200, 30]))))
            .collect();

        let email = AlertEmail::compose(0, at, &frames).unwrap();
        assert_eq!(email.subject, "Alert: Person Detected in ROI 1");
        assert!(email.body.starts_with("Person detected in ROI 1 at 2024-05-01 08:30:00"));
        assert!(email.body.ends_with("Attached are 3 frames captured during the alert."));

        let names: Vec<&str> = email.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["alert_frame_1.jpg", "alert_frame_2.jpg", "alert_frame_3.jpg"]);
        // JPEG SOI 标记
        assert!(email.attachments.iter().all(|a| a.data.starts_with(&[0xFF, 0xD8])));
    }
}
