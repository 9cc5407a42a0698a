pub mod channels;
pub mod link_sweeper;

pub mod starboard;
pub mod starboard_manager;
