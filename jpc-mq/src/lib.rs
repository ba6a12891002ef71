//! MQ arithmetic coder and EBCOT bit-plane block coder, the concrete
//! [`jpc::BlockCoder`] implementation `jpc` itself only depends on for its
//! own tests (mirroring how `iszak-jpeg2000`'s `jp2` crate pulls `jpc` in
//! only as a dev-dependency).

pub mod ebcot;
pub mod mq;

pub use ebcot::EbcotCoder;
pub use mq::{MqDecoder, MqEncoder};
