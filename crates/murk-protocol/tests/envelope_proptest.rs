use std::sync::Arc;

use proptest::prelude::*;

use murk_protocol::envelope;
use murk_protocol::message::{Chat, Download, DownloadReply, Handshake, Join, Search, UploadChunk};
use murk_protocol::{
    CryptoEnvelope, FileId, GroupId, Message, MurkProtocolError, PeerId, SymmetricCipher,
};

/// Strategy for one random message of the commonly relayed kinds.
fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Ping),
        Just(Message::Pong),
        Just(Message::Quit),
        Just(Message::ClientList),
        Just(Message::Socket),
        Just(Message::Tunnel),
        (any::<u64>(), any::<Option<u64>>(), ".{0,200}").prop_map(|(from, to, text)| {
            Message::Chat(Chat {
                from: PeerId::from_raw(from),
                to: to.map(PeerId::from_raw),
                group: None,
                text,
            })
        }),
        (any::<u64>(), "[a-z]{1,32}").prop_map(|(group, name)| {
            Message::Join(Join {
                group: Some(GroupId::from_raw(group)),
                name,
            })
        }),
        (any::<u64>(), any::<[u8; 32]>()).prop_map(|(peer, session_key)| {
            Message::Handshake(Handshake {
                peer: PeerId::from_raw(peer),
                endpoint: None,
                session_key,
                credentials: None,
            })
        }),
        (any::<u64>(), any::<u64>(), ".{0,64}").prop_map(|(from, id, query)| {
            Message::Search(Search {
                from: PeerId::from_raw(from),
                id,
                query,
            })
        }),
        (any::<[u8; 32]>(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..2048))
            .prop_map(|(file, chunk, data)| {
                Message::UploadChunk(UploadChunk {
                    file: FileId(file),
                    chunk,
                    data,
                })
            }),
        (any::<[u8; 32]>(), any::<u64>()).prop_map(|(file, chunk)| {
            Message::Download(Download {
                file: FileId(file),
                chunk,
            })
        }),
        (any::<[u8; 32]>(), any::<u64>(), any::<Option<Vec<u8>>>()).prop_map(
            |(file, chunk, data)| {
                Message::DownloadReply(DownloadReply {
                    file: FileId(file),
                    chunk,
                    data,
                    redirect: None,
                })
            }
        ),
    ]
}

proptest! {
    /// Any message list survives the envelope codec with order intact.
    #[test]
    fn roundtrip_message_lists(messages in prop::collection::vec(arb_message(), 0..16)) {
        let frame = envelope::encode(&messages).expect("encode");
        let decoded = envelope::decode(&frame).expect("decode");
        prop_assert_eq!(&decoded, &messages);
    }

    /// Any single corrupted byte after the checksum field is caught.
    #[test]
    fn corruption_is_always_detected(
        messages in prop::collection::vec(arb_message(), 1..8),
        index in any::<prop::sample::Index>(),
        flip in 1..=255u8,
    ) {
        let mut frame = envelope::encode(&messages).expect("encode");
        let byte = 4 + index.index(frame.len() - 4);
        frame[byte] ^= flip;
        prop_assert!(matches!(
            envelope::decode(&frame),
            Err(MurkProtocolError::ChecksumMismatch)
        ));
    }

    /// Truncating anywhere never panics and never decodes successfully.
    #[test]
    fn truncation_never_decodes(
        messages in prop::collection::vec(arb_message(), 1..8),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = envelope::encode(&messages).expect("encode");
        let keep = cut.index(frame.len());
        prop_assert!(envelope::decode(&frame[..keep]).is_err());
    }

    /// Sealing and opening through both crypto layers is lossless.
    #[test]
    fn sealed_roundtrip_through_both_layers(
        messages in prop::collection::vec(arb_message(), 0..8),
        session_key in any::<[u8; 32]>(),
        passphrase in "[ -~]{1,40}",
        group in any::<u64>(),
    ) {
        let crypto = CryptoEnvelope::new(
            Arc::new(SymmetricCipher::new(session_key)),
            Some(Arc::new(SymmetricCipher::from_passphrase(
                &passphrase,
                GroupId::from_raw(group),
            ))),
        );

        let frame = envelope::encode(&messages).expect("encode");
        let sealed = crypto.seal(&frame).expect("seal");
        let opened = crypto.open(&sealed).expect("open");
        let decoded = envelope::decode(&opened).expect("decode");
        prop_assert_eq!(&decoded, &messages);
    }

    /// Random bytes fed straight to the decoder fail cleanly.
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = envelope::decode(&bytes);
    }
}
