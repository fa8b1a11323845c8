//! Wire format for the two Unix-socket IPC endpoints the discoverer and
//! its control tools speak: the per-process Discoverer endpoint
//! (`discoverer` module) and the ProxyGroupManager endpoint (`proxy_group`
//! module), both framed by [`codec`].

pub mod codec;
pub mod discoverer;
pub mod proxy_group;

pub use codec::{read_frame, write_frame, CodecError, Reader, Writer, MAX_FRAME_LEN};
