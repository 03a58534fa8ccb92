pub mod cell_builder;
pub mod frame;

pub use cell_builder::{CellBuilder, CellMode, GpuCellRecord, GpuFrame, GlyphShaper, ShapedGlyph};
pub use frame::{CursorRender, TerminalEvent};
