pub mod needs;
pub mod behavior;
pub mod movement;
pub mod conversation;
