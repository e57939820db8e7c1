//! Shared weight arena, partitioned into interleaved per-slot views.
//!
//! Every live slot trains on the same physical array. A feature hash `h`
//! selects a *row*; inside the row each slot owns one `stride`-wide block:
//!
//! ```text
//! cell(h, slot, j) = (((h & mask) * wpp + slot) * stride) + j
//! ```
//!
//! `wpp` ("weights per problem") is the number of slots. The arena is sized
//! once at construction and never resized; reclaiming a slot means zeroing its
//! cells, not reallocating.

use crate::persist::{read_f32_vec, read_f64, read_len, read_u64, write_f32_slice, write_f64, write_u64};
use crate::{AutoMlError, ModelBuffer, Persist, MAX_RECORD_BYTES};

/// Upper bound on `weight_bits` accepted anywhere in the crate.
pub const MAX_WEIGHT_BITS: u32 = 24;

/// Upper bound on `stride` accepted anywhere in the crate.
pub const MAX_STRIDE: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub struct WeightArena {
    weight_bits: u32,
    wpp: usize,
    stride: usize,
    cells: Vec<f32>,
}

impl WeightArena {
    pub fn new(weight_bits: u32, wpp: usize, stride: usize) -> Result<Self, AutoMlError> {
        if weight_bits == 0 || weight_bits > MAX_WEIGHT_BITS {
            return Err(AutoMlError::config(format!(
                "weight_bits must be in 1..={MAX_WEIGHT_BITS}, got {weight_bits}"
            )));
        }
        if wpp == 0 || stride == 0 || stride > MAX_STRIDE {
            return Err(AutoMlError::config(format!(
                "weight arena needs wpp >= 1 and stride in 1..={MAX_STRIDE}, got wpp={wpp} stride={stride}"
            )));
        }
        let Some(len) = Self::cell_count(weight_bits, wpp, stride) else {
            return Err(AutoMlError::config(format!(
                "weight arena 2^{weight_bits} x {wpp} x {stride} does not fit in one checkpoint record"
            )));
        };
        Ok(Self {
            weight_bits,
            wpp,
            stride,
            cells: vec![0.0; len],
        })
    }

    /// Cells needed for a geometry, or `None` when the arena could not be
    /// written as a single checkpoint record.
    pub fn cell_count(weight_bits: u32, wpp: usize, stride: usize) -> Option<usize> {
        let rows = 1usize.checked_shl(weight_bits)?;
        let cells = rows.checked_mul(wpp)?.checked_mul(stride)?;
        (cells.checked_mul(4)? <= MAX_RECORD_BYTES).then_some(cells)
    }

    pub fn weight_bits(&self) -> u32 {
        self.weight_bits
    }

    /// Number of logical slots interleaved in each row.
    pub fn wpp(&self) -> usize {
        self.wpp
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn mask(&self) -> u64 {
        (1u64 << self.weight_bits) - 1
    }

    /// First cell of the block owned by `slot` for feature hash `h`.
    pub fn block_start(&self, h: u64, slot: usize) -> usize {
        (((h & self.mask()) as usize) * self.wpp + slot) * self.stride
    }

    /// Slot owning `cell`.
    pub fn slot_of_cell(&self, cell: usize) -> usize {
        (cell / self.stride) % self.wpp
    }

    /// Mutable view restricted to `slot`'s partition.
    pub fn slot_view(&mut self, slot: usize) -> Result<SlotWeights<'_>, AutoMlError> {
        if slot >= self.wpp {
            return Err(AutoMlError::invariant(format!(
                "slot {slot} outside arena with {} slots",
                self.wpp
            )));
        }
        Ok(SlotWeights { arena: self, slot })
    }

    fn slot_cells(&self, slot: usize) -> impl Iterator<Item = usize> + '_ {
        let row = self.wpp * self.stride;
        let base = slot * self.stride;
        (0..1usize << self.weight_bits)
            .flat_map(move |r| (r * row + base)..(r * row + base + self.stride))
    }

    pub fn clear_slot(&mut self, slot: usize) {
        if slot >= self.wpp {
            return;
        }
        let row = self.wpp * self.stride;
        let base = slot * self.stride;
        for chunk in self.cells.chunks_exact_mut(row) {
            chunk[base..base + self.stride].fill(0.0);
        }
    }

    /// Exchange the full contents of two slots.
    pub fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b || a >= self.wpp || b >= self.wpp {
            return;
        }
        let row = self.wpp * self.stride;
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let s = self.stride;
        for chunk in self.cells.chunks_exact_mut(row) {
            let (left, right) = chunk.split_at_mut(hi * s);
            left[lo * s..lo * s + s].swap_with_slice(&mut right[..s]);
        }
    }

    /// Copy of every cell owned by `slot`, row by row.
    pub fn slot_values(&self, slot: usize) -> Vec<f32> {
        if slot >= self.wpp {
            return Vec::new();
        }
        self.slot_cells(slot).map(|c| self.cells[c]).collect()
    }

    pub fn slot_is_zero(&self, slot: usize) -> bool {
        slot < self.wpp && self.slot_cells(slot).all(|c| self.cells[c] == 0.0)
    }

    /// Write the arena, keeping only the slots for which `keep` holds.
    pub(crate) fn write_filtered<B: ModelBuffer + ?Sized>(
        &self,
        buf: &mut B,
        keep: impl Fn(usize) -> bool,
    ) -> usize {
        let mut n = write_u64(buf, self.weight_bits as u64)
            + write_u64(buf, self.wpp as u64)
            + write_u64(buf, self.stride as u64);
        if (0..self.wpp).all(&keep) {
            return n + write_f32_slice(buf, &self.cells);
        }
        let mut copy = self.cells.clone();
        for (i, c) in copy.iter_mut().enumerate() {
            if !keep(self.slot_of_cell(i)) {
                *c = 0.0;
            }
        }
        n += write_f32_slice(buf, &copy);
        n
    }
}

impl Persist for WeightArena {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        self.write_filtered(buf, |_| true)
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        let bits = read_u64(buf, "weights.bits")?;
        let wpp = read_len(buf, "weights.wpp", 1 << 16)?;
        let stride = read_len(buf, "weights.stride", MAX_STRIDE as u64)?;
        if bits == 0 || bits > MAX_WEIGHT_BITS as u64 || wpp == 0 || stride == 0 {
            return Err(AutoMlError::decode(format!(
                "invalid arena geometry bits={bits} wpp={wpp} stride={stride}"
            )));
        }
        let Some(expected) = Self::cell_count(bits as u32, wpp, stride) else {
            return Err(AutoMlError::decode(format!(
                "arena geometry bits={bits} wpp={wpp} stride={stride} is too large"
            )));
        };
        let cells = read_f32_vec(buf, "weights.cells")?;
        if cells.len() != expected {
            return Err(AutoMlError::decode(format!(
                "weights.cells has {} cells, geometry needs {expected}",
                cells.len()
            )));
        }
        Ok(Self {
            weight_bits: bits as u32,
            wpp,
            stride,
            cells,
        })
    }
}

/// One slot's window onto the arena.
///
/// Block lookups can only land in this slot's partition; raw cell writes are
/// bounds- and ownership-checked.
pub struct SlotWeights<'a> {
    arena: &'a mut WeightArena,
    slot: usize,
}

impl SlotWeights<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn stride(&self) -> usize {
        self.arena.stride
    }

    /// The `stride`-wide block for feature hash `h`.
    pub fn block(&mut self, h: u64) -> &mut [f32] {
        let start = self.arena.block_start(h, self.slot);
        let stride = self.arena.stride;
        &mut self.arena.cells[start..start + stride]
    }

    pub fn read_block(&self, h: u64) -> &[f32] {
        let start = self.arena.block_start(h, self.slot);
        &self.arena.cells[start..start + self.arena.stride]
    }

    /// Write a raw cell index; fails if the cell belongs to another slot.
    pub fn write_cell(&mut self, cell: usize, value: f32) -> Result<(), AutoMlError> {
        if cell >= self.arena.cells.len() || self.arena.slot_of_cell(cell) != self.slot {
            return Err(AutoMlError::invariant(format!(
                "slot {} attempted write to cell {cell} outside its partition",
                self.slot
            )));
        }
        self.arena.cells[cell] = value;
        Ok(())
    }
}

/// Zero every non-champion slot (`1..total`) of an arena with `wpp` slots.
pub fn clear_non_champ_weights(
    weights: &mut WeightArena,
    total: usize,
    wpp: usize,
) -> Result<(), AutoMlError> {
    if wpp != weights.wpp() || total > wpp {
        return Err(AutoMlError::invariant(format!(
            "clear_non_champ_weights: total={total} wpp={wpp} arena_wpp={}",
            weights.wpp()
        )));
    }
    for slot in 1..total {
        weights.clear_slot(slot);
    }
    Ok(())
}

// ============================================================================
// Per-slot auxiliary learner state
// ============================================================================

/// Learner-side running totals that are not weights but still belong to one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotAux {
    /// Sum of importance weights seen by the slot.
    pub total_weight: f64,
    /// Number of learned events.
    pub event_sum: u64,
    /// Number of actions across learned events.
    pub action_sum: u64,
}

impl SlotAux {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Persist for SlotAux {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        write_f64(buf, self.total_weight)
            + write_u64(buf, self.event_sum)
            + write_u64(buf, self.action_sum)
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        Ok(Self {
            total_weight: read_f64(buf, "aux.total_weight")?,
            event_sum: read_u64(buf, "aux.event_sum")?,
            action_sum: read_u64(buf, "aux.action_sum")?,
        })
    }
}
