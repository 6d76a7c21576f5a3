//! State transfer protocol.
//!
//! Every subsystem describes its serializable state exactly once, by
//! implementing [`Stateful`] and handing each register, flag and memory
//! region to a [`Transfer`] in a fixed order. The same traversal then runs
//! in one of three modes:
//!
//! | Mode   | Effect                                              |
//! |--------|-----------------------------------------------------|
//! | `Size` | sums field widths, touches no values                |
//! | `Save` | copies each field into the output buffer            |
//! | `Load` | copies bytes from the input buffer into each field  |
//!
//! Because save and load share one field list they cannot drift apart.
//! Multi-byte scalars are stored little-endian, `bool` as one byte.
//!
//! ```text
//! impl Stateful for Cpu {
//!     fn transfer_state(&mut self, t: &mut Transfer<'_>) {
//!         t.value("cpu.a", &mut self.a);
//!         t.value("cpu.pc", &mut self.pc);
//!         t.bytes("cpu.ram", &mut self.ram);
//!     }
//! }
//! ```

use crate::error::StateError;

/// Traversal behavior. Never affects field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Size,
    Save,
    Load,
}

/// One entry of the canonical field list, as seen by a layout traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateField {
    pub name: &'static str,
    /// Byte offset inside the payload
    pub offset: usize,
    /// Declared width in bytes
    pub width: usize,
}

/// A fixed-width value that can be stored in a state payload.
pub trait Scalar: Copy {
    const WIDTH: usize;
    fn write_le(self, out: &mut [u8]);
    fn read_le(src: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(src: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(src);
                <$t>::from_le_bytes(raw)
            }
        }
    )*};
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Scalar for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    #[inline]
    fn read_le(src: &[u8]) -> Self {
        src[0] != 0
    }
}

enum Buffer<'a> {
    None,
    Out(&'a mut [u8]),
    In(&'a [u8]),
}

/// Visitor that walks a machine's state fields in one [`TransferMode`].
pub struct Transfer<'a> {
    mode: TransferMode,
    buf: Buffer<'a>,
    pos: usize,
    overrun: bool,
    layout: Option<Vec<StateField>>,
}

impl<'a> Transfer<'a> {
    /// Size traversal.
    pub fn size() -> Self {
        Transfer { mode: TransferMode::Size, buf: Buffer::None, pos: 0, overrun: false, layout: None }
    }

    /// Size traversal that also records every field descriptor.
    pub fn layout() -> Self {
        Transfer { layout: Some(Vec::new()), ..Transfer::size() }
    }

    /// Save traversal into `out`, which must be exactly the Size result.
    pub fn save(out: &'a mut [u8]) -> Self {
        Transfer { mode: TransferMode::Save, buf: Buffer::Out(out), pos: 0, overrun: false, layout: None }
    }

    /// Load traversal from `src`.
    ///
    /// Callers must check `src.len()` against the Size result first; see
    /// [`read_fields`].
    pub fn load(src: &'a [u8]) -> Self {
        Transfer { mode: TransferMode::Load, buf: Buffer::In(src), pos: 0, overrun: false, layout: None }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Bytes visited so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn record(&mut self, name: &'static str, width: usize) {
        if let Some(layout) = self.layout.as_mut() {
            layout.push(StateField { name, offset: self.pos, width });
        }
    }

    /// Transfer a scalar register or flag.
    pub fn value<T: Scalar>(&mut self, name: &'static str, field: &mut T) {
        self.record(name, T::WIDTH);
        let end = self.pos + T::WIDTH;
        match &mut self.buf {
            Buffer::None => {}
            Buffer::Out(out) => match out.get_mut(self.pos..end) {
                Some(dst) => field.write_le(dst),
                None => self.overrun = true,
            },
            Buffer::In(src) => match src.get(self.pos..end) {
                Some(bytes) => *field = T::read_le(bytes),
                None => self.overrun = true,
            },
        }
        self.pos = end;
    }

    /// Transfer a fixed-size memory region. Its width is the slice length.
    pub fn bytes(&mut self, name: &'static str, field: &mut [u8]) {
        let width = field.len();
        self.record(name, width);
        let end = self.pos + width;
        match &mut self.buf {
            Buffer::None => {}
            Buffer::Out(out) => match out.get_mut(self.pos..end) {
                Some(dst) => dst.copy_from_slice(field),
                None => self.overrun = true,
            },
            Buffer::In(src) => match src.get(self.pos..end) {
                Some(bytes) => field.copy_from_slice(bytes),
                None => self.overrun = true,
            },
        }
        self.pos = end;
    }

    /// Complete the traversal and return the number of bytes visited.
    ///
    /// Save and Load fail with `CorruptState` unless the traversal covered
    /// the buffer exactly.
    pub fn finish(self) -> Result<usize, StateError> {
        let expected = match &self.buf {
            Buffer::None => return Ok(self.pos),
            Buffer::Out(out) => out.len(),
            Buffer::In(src) => src.len(),
        };
        if self.overrun || self.pos != expected {
            return Err(StateError::CorruptState { expected, found: self.pos });
        }
        Ok(self.pos)
    }

    /// Recorded field list (empty unless built with [`Transfer::layout`]).
    pub fn into_layout(self) -> Vec<StateField> {
        self.layout.unwrap_or_default()
    }
}

/// Anything that contributes fields to a save state.
///
/// Implementations must register the same fields in the same order on
/// every call, whatever the mode.
pub trait Stateful {
    fn transfer_state(&mut self, t: &mut Transfer<'_>);
}

/// Payload size for the current config.
pub fn measure<S: Stateful + ?Sized>(state: &mut S) -> usize {
    let mut t = Transfer::size();
    state.transfer_state(&mut t);
    t.position()
}

/// Canonical field list with offsets, for diagnostics.
pub fn layout<S: Stateful + ?Sized>(state: &mut S) -> Vec<StateField> {
    let mut t = Transfer::layout();
    state.transfer_state(&mut t);
    t.into_layout()
}

/// Run a Save traversal into `out`.
pub fn write_fields<S: Stateful + ?Sized>(state: &mut S, out: &mut [u8]) -> Result<usize, StateError> {
    let mut t = Transfer::save(out);
    state.transfer_state(&mut t);
    t.finish()
}

/// Run a Load traversal from `src`.
///
/// The length is checked against a Size traversal before any field is
/// touched, so a mismatched buffer leaves `state` unchanged.
pub fn read_fields<S: Stateful + ?Sized>(state: &mut S, src: &[u8]) -> Result<(), StateError> {
    let expected = measure(state);
    if src.len() != expected {
        return Err(StateError::CorruptState { expected, found: src.len() });
    }
    let mut t = Transfer::load(src);
    state.transfer_state(&mut t);
    t.finish().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Regs {
        a: u8,
        pc: u16,
        cycles: u64,
        offset: i16,
        irq: bool,
        ram: [u8; 8],
    }

    impl Stateful for Regs {
        fn transfer_state(&mut self, t: &mut Transfer<'_>) {
            t.value("a", &mut self.a);
            t.value("pc", &mut self.pc);
            t.value("cycles", &mut self.cycles);
            t.value("offset", &mut self.offset);
            t.value("irq", &mut self.irq);
            t.bytes("ram", &mut self.ram);
        }
    }

    fn sample() -> Regs {
        Regs {
            a: 0x42,
            pc: 0xC000,
            cycles: 0x0102_0304_0506_0708,
            offset: -2,
            irq: true,
            ram: [1, 2, 3, 4, 5, 6, 7, 8],
        }
    }

    #[test]
    fn test_size_sums_widths() {
        let mut r = Regs::default();
        assert_eq!(measure(&mut r), 1 + 2 + 8 + 2 + 1 + 8);
        // Size must not touch values
        assert_eq!(r, Regs::default());
    }

    #[test]
    fn test_save_matches_size() {
        let mut r = sample();
        let mut out = vec![0u8; measure(&mut r)];
        let written = write_fields(&mut r, &mut out).unwrap();
        assert_eq!(written, out.len());
        assert_eq!(measure(&mut r), written);
    }

    #[test]
    fn test_little_endian_encoding() {
        let mut r = sample();
        let mut out = vec![0u8; measure(&mut r)];
        write_fields(&mut r, &mut out).unwrap();
        assert_eq!(out[0], 0x42);
        assert_eq!(&out[1..3], &[0x00, 0xC0]);
        assert_eq!(out[3], 0x08);
        assert_eq!(&out[11..13], &[0xFE, 0xFF]);
        assert_eq!(out[13], 1);
    }

    #[test]
    fn test_load_restores_fields() {
        let mut src = sample();
        let mut buf = vec![0u8; measure(&mut src)];
        write_fields(&mut src, &mut buf).unwrap();

        let mut dst = Regs::default();
        read_fields(&mut dst, &buf).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_load_wrong_length_is_all_or_nothing() {
        let mut src = sample();
        let mut buf = vec![0u8; measure(&mut src)];
        write_fields(&mut src, &mut buf).unwrap();
        buf.pop();

        let mut dst = Regs::default();
        let err = read_fields(&mut dst, &buf).unwrap_err();
        assert!(matches!(err, StateError::CorruptState { expected: 22, found: 21 }));
        assert_eq!(dst, Regs::default());
    }

    #[test]
    fn test_short_save_buffer_reports_overrun() {
        let mut r = sample();
        let mut out = vec![0u8; 4];
        let err = write_fields(&mut r, &mut out).unwrap_err();
        assert!(matches!(err, StateError::CorruptState { expected: 4, .. }));
    }

    #[test]
    fn test_bool_loads_any_nonzero() {
        let mut r = Regs::default();
        let mut buf = vec![0u8; measure(&mut r)];
        buf[13] = 0x80;
        read_fields(&mut r, &buf).unwrap();
        assert!(r.irq);
    }

    #[test]
    fn test_layout_offsets() {
        let mut r = Regs::default();
        let fields = layout(&mut r);
        let names: Vec<_> = fields.iter().map(|f| f.name).collect();
        assert_eq!(names, ["a", "pc", "cycles", "offset", "irq", "ram"]);
        assert_eq!(fields[2], StateField { name: "cycles", offset: 3, width: 8 });
        assert_eq!(fields[5].offset + fields[5].width, measure(&mut r));
    }
}
