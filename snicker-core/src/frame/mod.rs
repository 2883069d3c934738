//! # Frame pipeline
//!
//! ```text
//! ProtocolAdapter ──RawFrame──► FrameDecoder ──DecodedImage──► FrameCompositor ──► CompositeOutput
//! ```
//!
//! | Module       | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | `types`      | Frame/image types shared by every pipeline stage      |
//! | `decoder`    | JPEG / TGA / raw RGB decoding, rotation, quality depth |
//! | `compositor` | Layout arrangement and interpolated scaling            |

pub mod compositor;
pub mod decoder;
pub mod types;

pub use compositor::FrameCompositor;
pub use decoder::FrameDecoder;
pub use types::{CompositeFrame, CompositeOutput, DecodedImage, PayloadFormat, RawFrame, Screen};
