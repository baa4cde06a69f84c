//! Builds transport messages from API payloads.
//!
//! Media is routed by MIME type: each content class has its own delivery
//! semantics on WhatsApp (inline preview, streaming, push-to-talk, file).

use crmlink_protocol::{OutboundMessage, SendPayload};

/// File name used for documents sent without one.
pub const DEFAULT_DOCUMENT_NAME: &str = "file";

/// The only MIME essence delivered as a push-to-talk voice note.
const VOICE_NOTE_MIMETYPE: &str = "audio/ogg";

/// Converts a [`SendPayload`] into the message handed to the transport.
pub fn build_outbound(payload: SendPayload) -> OutboundMessage {
    match payload {
        SendPayload::Text { text } => OutboundMessage::Text { text },
        SendPayload::Media {
            source,
            mimetype,
            caption,
            file_name,
        } => {
            let essence = mime_essence(&mimetype);
            if essence.starts_with("image/") {
                OutboundMessage::Image {
                    media: source,
                    mimetype,
                    caption,
                }
            } else if essence.starts_with("video/") {
                OutboundMessage::Video {
                    media: source,
                    mimetype,
                    caption,
                }
            } else if essence.starts_with("audio/") {
                OutboundMessage::Audio {
                    media: source,
                    voice_note: essence == VOICE_NOTE_MIMETYPE,
                    mimetype,
                }
            } else {
                OutboundMessage::Document {
                    media: source,
                    mimetype,
                    file_name: file_name.unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.into()),
                    caption,
                }
            }
        }
    }
}

/// Lowercased `type/subtype` without parameters (`audio/ogg; codecs=opus`
/// becomes `audio/ogg`).
fn mime_essence(mimetype: &str) -> String {
    mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmlink_protocol::MediaSource;

    fn media(mimetype: &str) -> SendPayload {
        SendPayload::Media {
            source: MediaSource::Url("https://cdn.example.com/x".into()),
            mimetype: mimetype.into(),
            caption: Some("caption".into()),
            file_name: None,
        }
    }

    #[test]
    fn text_stays_text() {
        assert_eq!(
            build_outbound(SendPayload::text("hi")),
            OutboundMessage::Text { text: "hi".into() }
        );
    }

    #[test]
    fn image_and_video_carry_caption() {
        match build_outbound(media("image/png")) {
            OutboundMessage::Image { caption, .. } => assert_eq!(caption.as_deref(), Some("caption")),
            other => panic!("expected image, got {other:?}"),
        }
        match build_outbound(media("video/mp4")) {
            OutboundMessage::Video { mimetype, .. } => assert_eq!(mimetype, "video/mp4"),
            other => panic!("expected video, got {other:?}"),
        }
    }

    #[test]
    fn ogg_audio_is_voice_note() {
        match build_outbound(media("audio/ogg")) {
            OutboundMessage::Audio { voice_note, .. } => assert!(voice_note),
            other => panic!("expected audio, got {other:?}"),
        }
        match build_outbound(media("audio/ogg; codecs=opus")) {
            OutboundMessage::Audio {
                voice_note,
                mimetype,
                ..
            } => {
                assert!(voice_note);
                assert_eq!(mimetype, "audio/ogg; codecs=opus");
            }
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn other_audio_is_not_voice_note() {
        for mt in ["audio/mp4", "audio/mpeg", "audio/oggx"] {
            match build_outbound(media(mt)) {
                OutboundMessage::Audio { voice_note, .. } => assert!(!voice_note, "{mt}"),
                other => panic!("expected audio for {mt}, got {other:?}"),
            }
        }
    }

    #[test]
    fn mime_prefix_is_case_insensitive() {
        assert!(matches!(
            build_outbound(media("IMAGE/JPEG")),
            OutboundMessage::Image { .. }
        ));
    }

    #[test]
    fn unknown_types_become_documents() {
        match build_outbound(media("application/pdf")) {
            OutboundMessage::Document { file_name, caption, .. } => {
                assert_eq!(file_name, DEFAULT_DOCUMENT_NAME);
                assert_eq!(caption.as_deref(), Some("caption"));
            }
            other => panic!("expected document, got {other:?}"),
        }

        let named = SendPayload::Media {
            source: MediaSource::Bytes(vec![0x25, 0x50]),
            mimetype: "text/csv".into(),
            caption: None,
            file_name: Some("contacts.csv".into()),
        };
        match build_outbound(named) {
            OutboundMessage::Document { file_name, .. } => assert_eq!(file_name, "contacts.csv"),
            other => panic!("expected document, got {other:?}"),
        }
    }
}
