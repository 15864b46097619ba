//! Dense SDF volume storage.
//!
//! [`SdfField`] owns a contiguous, 32-byte-aligned heap array of scalars in
//! X-fastest order. Dimensions are fixed at allocation; regenerating a
//! terrain replaces the whole field rather than resizing in place.

pub mod generator;

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::{EngineError, EngineResult};

/// Alignment of the backing allocation, matching SIMD-friendly stride.
const FIELD_ALIGN: usize = 32;

/// Dense 3D scalar grid, X-fastest layout: `idx = (z * sy + y) * sx + x`.
///
/// Move-only: no `Clone`, so a 100^3+ float volume is never duplicated by
/// accident. Shared ownership between the terrain system and the active
/// backend goes through `Arc<parking_lot::RwLock<SdfField<f32>>>`.
pub struct SdfField<T> {
    data: NonNull<T>,
    sx: usize,
    sy: usize,
    sz: usize,
    _marker: PhantomData<T>,
}

// The raw allocation is uniquely owned and T is plain data.
unsafe impl<T: Send> Send for SdfField<T> {}
unsafe impl<T: Sync> Sync for SdfField<T> {}

impl<T: bytemuck::Pod> SdfField<T> {
    /// Allocate a zero-initialized field. Fails on non-positive dimensions;
    /// allocation failure aborts (fatal, per the engine's recovery policy).
    pub fn new(sx: usize, sy: usize, sz: usize) -> EngineResult<Self> {
        if sx == 0 || sy == 0 || sz == 0 {
            return Err(EngineError::InvalidGrid {
                reason: format!("field dimensions must be positive, got {}x{}x{}", sx, sy, sz),
            });
        }
        let len = sx
            .checked_mul(sy)
            .and_then(|v| v.checked_mul(sz))
            .ok_or_else(|| EngineError::InvalidGrid {
                reason: format!("field dimensions overflow: {}x{}x{}", sx, sy, sz),
            })?;

        let layout = Layout::from_size_align(len * std::mem::size_of::<T>(), FIELD_ALIGN)
            .map_err(|e| EngineError::InvalidGrid { reason: e.to_string() })?;
        // Zeroed alloc: T is Pod, all-zero bits are a valid value.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let data = match NonNull::new(raw as *mut T) {
            Some(p) => p,
            None => alloc::handle_alloc_error(layout),
        };

        Ok(Self { data, sx, sy, sz, _marker: PhantomData })
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.sx, self.sy, self.sz)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sx * self.sy * self.sz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.sx && y < self.sy && z < self.sz);
        (z * self.sy + y) * self.sx + x
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize, z: usize) -> T {
        self.as_slice()[self.index(x, y, z)]
    }

    #[inline]
    pub fn at_mut(&mut self, x: usize, y: usize, z: usize) -> &mut T {
        let idx = self.index(x, y, z);
        &mut self.as_mut_slice()[idx]
    }

    /// Clamped addressing for boundary stencils (gradient estimation, chunk
    /// copies at field edges). Each axis clamps to `[0, dim-1]`.
    #[inline]
    pub fn at_clamped(&self, x: i64, y: i64, z: i64) -> T {
        let cx = x.clamp(0, self.sx as i64 - 1) as usize;
        let cy = y.clamp(0, self.sy as i64 - 1) as usize;
        let cz = z.clamp(0, self.sz as i64 - 1) as usize;
        self.at(cx, cy, cz)
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len()) }
    }

    /// Fill the entire field from a function of the sample index.
    pub fn fill_with(&mut self, mut f: impl FnMut(usize, usize, usize) -> T) {
        let (sx, sy, sz) = (self.sx, self.sy, self.sz);
        let slice = self.as_mut_slice();
        let mut idx = 0;
        for z in 0..sz {
            for y in 0..sy {
                for x in 0..sx {
                    slice[idx] = f(x, y, z);
                    idx += 1;
                }
            }
        }
    }
}

impl<T> Drop for SdfField<T> {
    fn drop(&mut self) {
        let len = self.sx * self.sy * self.sz;
        if len > 0 {
            let layout =
                Layout::from_size_align(len * std::mem::size_of::<T>(), FIELD_ALIGN).unwrap();
            unsafe { alloc::dealloc(self.data.as_ptr() as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimension() {
        assert!(SdfField::<f32>::new(0, 4, 4).is_err());
        assert!(SdfField::<f32>::new(4, 4, 0).is_err());
    }

    #[test]
    fn allocation_is_aligned_and_zeroed() {
        let field = SdfField::<f32>::new(17, 9, 5).unwrap();
        assert_eq!(field.as_slice().as_ptr() as usize % FIELD_ALIGN, 0);
        assert!(field.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn x_fastest_linear_layout() {
        let mut field = SdfField::<f32>::new(4, 3, 2).unwrap();
        *field.at_mut(1, 2, 1) = 7.0;
        // idx = (z * sy + y) * sx + x
        assert_eq!(field.as_slice()[(1 * 3 + 2) * 4 + 1], 7.0);
        assert_eq!(field.at(1, 2, 1), 7.0);
    }

    #[test]
    fn clamped_access_at_boundaries() {
        let mut field = SdfField::<f32>::new(3, 3, 3).unwrap();
        *field.at_mut(0, 0, 0) = 1.0;
        *field.at_mut(2, 2, 2) = 2.0;
        assert_eq!(field.at_clamped(-5, -1, 0), 1.0);
        assert_eq!(field.at_clamped(9, 3, 100), 2.0);
    }
}
