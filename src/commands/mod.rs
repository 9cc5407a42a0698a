pub mod starboard;

use crate::types::{Data, Error};
use poise::Command;

pub fn all_commands() -> Vec<Command<Data, Error>> {
    starboard::all_commands()
}
