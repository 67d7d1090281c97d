pub mod checksum;
pub mod correlate;
pub mod ipv6_ext;
pub mod mpls;
pub mod payload;
pub mod timestamp;
pub mod view;

pub use correlate::*;
pub use payload::SCAN_SIGNATURE;
pub use view::PacketView;
