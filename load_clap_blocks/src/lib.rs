//! Building blocks for [`clap`]-driven configuration of the load path.
pub mod tablet_channel;
