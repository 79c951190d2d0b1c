/// Number of cells in the stack and in the heap.
pub const MEMMAX: usize = 1 << 16;

/// Fixed-capacity array of `MEMMAX` signed 32-bit cells.
///
/// Addresses are `i64` so that callers can pass raw pointer arithmetic
/// straight through; anything outside `0..MEMMAX` is rejected instead of
/// panicking.
pub(super) struct Memory {
    cells: Box<[i32]>,
}

impl Memory {
    /// Creates a zero-filled memory of `MEMMAX` cells.
    pub(super) fn new() -> Self {
        Self {
            cells: vec![0; MEMMAX].into_boxed_slice(),
        }
    }

    fn index(addr: i64) -> Option<usize> {
        usize::try_from(addr).ok().filter(|&i| i < MEMMAX)
    }

    /// Returns the cell at `addr`, or `None` outside `0..MEMMAX`.
    pub(super) fn get(&self, addr: i64) -> Option<i32> {
        Self::index(addr).map(|i| self.cells[i])
    }

    /// Returns a mutable reference to the cell at `addr`, or `None` outside `0..MEMMAX`.
    pub(super) fn get_mut(&mut self, addr: i64) -> Option<&mut i32> {
        Self::index(addr).map(|i| &mut self.cells[i])
    }

    /// All cells, live or stale.
    pub(super) fn cells(&self) -> &[i32] {
        &self.cells
    }

    /// Cells `0..=top`, clamped to capacity. Empty when `top < 0`.
    pub(super) fn up_to(&self, top: i64) -> &[i32] {
        match usize::try_from(top) {
            Ok(top) => &self.cells[..=top.min(MEMMAX - 1)],
            Err(_) => &[],
        }
    }
}
