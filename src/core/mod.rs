//! # Core Protocol Components
//!
//! Packet model, text wire grammar, classification and stream framing.
//!
//! ## Components
//! - **Packet**: typed outbound pairs and the decoded inbound view
//! - **Wire**: escaping plus packet and dictionary encode/decode
//! - **Kind**: the closed set of packet types produced at decode time
//! - **Codec**: Tokio codec splitting a byte stream on `\final\`
//!
//! ## Wire Format
//! ```text
//! \lc\1\nc\<base64>\id\1\final\
//! ```
//!
//! ## Security
//! - Maximum packet size enforced before a frame is buffered further
//! - Decoding never panics and never fails fatally on unknown types

pub mod codec;
pub mod kind;
pub mod packet;
pub mod wire;
