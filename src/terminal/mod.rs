pub mod color;
pub mod cursor;
pub mod grid;
pub mod kitty;
pub mod modes;
pub mod mouse;
pub mod search;
pub mod selection;
pub mod state;

pub use state::TerminalState;
