use thiserror::Error;

/// Everything that can go wrong turning bytes into a typed message or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload")]
    MalformedPayload(#[source] bincode::error::DecodeError),

    #[error("failed to encode payload")]
    EncodeFailed(#[source] bincode::error::EncodeError),

    #[error("frame length {0} exceeds the maximum allowed frame size")]
    FrameTooLarge(u32),
}
