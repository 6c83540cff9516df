use cubecl::prelude::*;

/// Rectangular window into a flat buffer.
///
/// Coordinates are logical: `x` is the column and `y` the row of the matrix,
/// whatever its layout. `width`/`height` are the absolute column/row bounds
/// of the matrix (not of the tile), so a tile whose origin sits near the
/// bound is clamped to `min(origin + tile, bound) - origin`. `pitch` is the
/// leading dimension and may exceed `width`, which lets a descriptor view a
/// sub-matrix of a wider one.
#[derive(CubeType, Clone, Copy)]
pub struct TileDesc {
    pub base: usize,
    pub width: usize,
    pub height: usize,
    pub pitch: usize,
    pub x: usize,
    pub y: usize,
    #[cube(comptime)]
    pub col_major: bool,
}

#[cube]
impl TileDesc {
    pub fn new(
        base: usize,
        width: usize,
        height: usize,
        pitch: usize,
        x: usize,
        y: usize,
    ) -> TileDesc {
        TileDesc {
            base,
            width,
            height,
            pitch,
            x,
            y,
            col_major: false,
        }
    }

    /// Like [`TileDesc::new`], but `pitch` separates columns instead of rows.
    pub fn new_col_major(
        base: usize,
        width: usize,
        height: usize,
        pitch: usize,
        x: usize,
        y: usize,
    ) -> TileDesc {
        TileDesc {
            base,
            width,
            height,
            pitch,
            x,
            y,
            col_major: true,
        }
    }

    /// Whether element `(row, col)` of a tile at the origin is inside the matrix.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.y + row < self.height && self.x + col < self.width
    }

    /// Flat index of element `(row, col)` of a tile at the origin.
    pub fn offset(&self, row: usize, col: usize) -> usize {
        let r = self.y + row;
        let c = self.x + col;
        if comptime!(self.col_major) {
            self.base + c * self.pitch + r
        } else {
            self.base + r * self.pitch + c
        }
    }

    /// The same window with its origin moved `cols` columns right.
    pub fn step_cols(&self, cols: usize) -> TileDesc {
        TileDesc {
            base: self.base,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            x: self.x + cols,
            y: self.y,
            col_major: self.col_major,
        }
    }

    /// The same window with its origin moved `rows` rows down.
    pub fn step_rows(&self, rows: usize) -> TileDesc {
        TileDesc {
            base: self.base,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            x: self.x,
            y: self.y + rows,
            col_major: self.col_major,
        }
    }
}
