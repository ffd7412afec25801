//! Range encoder handed to the sub-encoders, one packet at a time.
//!
//! This is the RFC 6716 section 4.1 encoder: range-coded symbols grow from
//! the front of the buffer while raw bits grow from the back. [`RangeEncoder::finish`]
//! closes the gap so the payload is contiguous.

use alloc::vec;
use alloc::vec::Vec;

const EC_SYM_BITS: u32 = 8;
const EC_CODE_BITS: u32 = 32;
const EC_SYM_MAX: u32 = (1 << EC_SYM_BITS) - 1;
const EC_CODE_TOP: u32 = 1 << (EC_CODE_BITS - 1);
const EC_CODE_BOT: u32 = EC_CODE_TOP >> EC_SYM_BITS;
const EC_CODE_SHIFT: u32 = EC_CODE_BITS - EC_SYM_BITS - 1;
const EC_UINT_BITS: u32 = 8;
const EC_WINDOW_SIZE: u32 = 32;

#[inline]
fn ec_ilog(v: u32) -> i32 {
    (32 - v.leading_zeros()) as i32
}

/// Range encoder that owns its output buffer.
#[derive(Debug, Clone)]
pub struct RangeEncoder {
    buf: Vec<u8>,
    storage: u32,
    end_offs: u32,
    end_window: u32,
    nend_bits: i32,
    nbits_total: i32,
    offs: u32,
    rng: u32,
    val: u32,
    ext: u32,
    rem: i32,
    error: bool,
}

impl RangeEncoder {
    /// Creates an encoder that may write up to `max_bytes`.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        let mut enc = RangeEncoder {
            buf: Vec::new(),
            storage: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: 0,
            offs: 0,
            rng: 0,
            val: 0,
            ext: 0,
            rem: 0,
            error: false,
        };
        enc.reset(max_bytes);
        enc
    }

    /// Restarts encoding into a fresh budget of `max_bytes`.
    pub fn reset(&mut self, max_bytes: usize) {
        if self.buf.len() < max_bytes {
            self.buf = vec![0; max_bytes];
        } else {
            self.buf[..max_bytes].fill(0);
        }
        self.storage = max_bytes as u32;
        self.end_offs = 0;
        self.end_window = 0;
        self.nend_bits = 0;
        self.nbits_total = EC_CODE_BITS as i32 + 1;
        self.offs = 0;
        self.rng = EC_CODE_TOP;
        self.val = 0;
        self.ext = 0;
        self.rem = -1;
        self.error = false;
    }

    /// Byte budget of the current packet.
    #[must_use]
    pub fn storage(&self) -> usize {
        self.storage as usize
    }

    /// Whether a write ran past the budget.
    #[must_use]
    pub fn error(&self) -> bool {
        self.error
    }

    /// Bits used so far, rounded up.
    #[must_use]
    pub fn tell(&self) -> i32 {
        self.nbits_total - ec_ilog(self.rng)
    }

    /// Final range, used by decoders to verify a packet.
    #[must_use]
    pub fn range_final(&self) -> u32 {
        self.rng
    }

    fn write_byte(&mut self, value: u32) {
        if self.offs + self.end_offs >= self.storage {
            self.error = true;
        } else {
            self.buf[self.offs as usize] = value as u8;
            self.offs += 1;
        }
    }

    fn write_byte_at_end(&mut self, value: u32) {
        if self.offs + self.end_offs >= self.storage {
            self.error = true;
        } else {
            self.end_offs += 1;
            self.buf[(self.storage - self.end_offs) as usize] = value as u8;
        }
    }

    fn carry_out(&mut self, c: i32) {
        if c == EC_SYM_MAX as i32 {
            self.ext = self.ext.wrapping_add(1);
            return;
        }
        let carry = c >> EC_SYM_BITS;
        if self.rem >= 0 {
            self.write_byte((self.rem + carry) as u32);
        }
        if self.ext > 0 {
            let sym = (EC_SYM_MAX + carry as u32) & EC_SYM_MAX;
            while self.ext > 0 {
                self.write_byte(sym);
                self.ext -= 1;
            }
        }
        self.rem = c & EC_SYM_MAX as i32;
    }

    fn normalize(&mut self) {
        while self.rng <= EC_CODE_BOT {
            self.carry_out((self.val >> EC_CODE_SHIFT) as i32);
            self.val = (self.val << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            self.rng <<= EC_SYM_BITS;
            self.nbits_total += EC_SYM_BITS as i32;
        }
    }

    /// Encodes a symbol occupying `[fl, fh)` of a total frequency `ft`.
    pub fn encode(&mut self, fl: u32, fh: u32, ft: u32) {
        debug_assert!(fl < fh && fh <= ft);
        let r = self.rng / ft;
        if fl > 0 {
            self.val = self
                .val
                .wrapping_add(self.rng.wrapping_sub(r.wrapping_mul(ft - fl)));
            self.rng = r.wrapping_mul(fh - fl);
        } else {
            self.rng = self.rng.wrapping_sub(r.wrapping_mul(ft - fh));
        }
        self.normalize();
    }

    /// Same as [`Self::encode`] with `ft = 1 << bits`.
    pub fn encode_bin(&mut self, fl: u32, fh: u32, bits: u32) {
        let r = self.rng >> bits;
        let total = 1u32 << bits;
        if fl > 0 {
            self.val = self
                .val
                .wrapping_add(self.rng.wrapping_sub(r.wrapping_mul(total - fl)));
            self.rng = r.wrapping_mul(fh - fl);
        } else {
            self.rng = self.rng.wrapping_sub(r.wrapping_mul(total - fh));
        }
        self.normalize();
    }

    /// Encodes a bit whose probability of being one is `1 / (1 << logp)`.
    pub fn enc_bit_logp(&mut self, val: bool, logp: u32) {
        let r = self.rng;
        let s = r >> logp;
        if val {
            self.val = self.val.wrapping_add(r - s);
            self.rng = s;
        } else {
            self.rng = r - s;
        }
        self.normalize();
    }

    /// Encodes symbol `s` from an 8-bit inverse CDF with `ftb` bits of total.
    pub fn enc_icdf(&mut self, s: usize, icdf: &[u8], ftb: u32) {
        let r = self.rng >> ftb;
        if s > 0 {
            let high = u32::from(icdf[s - 1]);
            self.val = self
                .val
                .wrapping_add(self.rng.wrapping_sub(r.wrapping_mul(high)));
            self.rng = r.wrapping_mul(high - u32::from(icdf[s]));
        } else {
            self.rng = self.rng.wrapping_sub(r.wrapping_mul(u32::from(icdf[s])));
        }
        self.normalize();
    }

    /// Encodes `fl` uniformly in `[0, ft)`.
    pub fn enc_uint(&mut self, fl: u32, ft: u32) {
        debug_assert!(ft > 1);
        let ft = ft - 1;
        let ftb = ec_ilog(ft) as u32;
        if ftb > EC_UINT_BITS {
            let shift = ftb - EC_UINT_BITS;
            let ft_small = (ft >> shift) + 1;
            let fl_small = fl >> shift;
            self.encode(fl_small, fl_small + 1, ft_small);
            self.enc_bits(fl & ((1u32 << shift) - 1), shift);
        } else {
            self.encode(fl, fl + 1, ft + 1);
        }
    }

    /// Appends `bits` raw bits to the back of the buffer.
    pub fn enc_bits(&mut self, fl: u32, bits: u32) {
        debug_assert!(bits > 0 && bits <= 25);
        let mut window = self.end_window;
        let mut used = self.nend_bits;
        if used as u32 + bits > EC_WINDOW_SIZE {
            while used >= EC_SYM_BITS as i32 {
                self.write_byte_at_end(window & EC_SYM_MAX);
                window >>= EC_SYM_BITS;
                used -= EC_SYM_BITS as i32;
            }
        }
        window |= fl << used;
        used += bits as i32;
        self.end_window = window;
        self.nend_bits = used;
        self.nbits_total += bits as i32;
    }

    /// Flushes the coder state. No symbols may be written afterwards.
    pub fn done(&mut self) {
        let mut window = self.end_window;
        let mut used = self.nend_bits;
        let mut l = EC_CODE_BITS as i32 - ec_ilog(self.rng);
        let mut msk = (EC_CODE_TOP - 1) >> l;
        let mut end = self.val.wrapping_add(msk) & !msk;
        if (end | msk) >= self.val.wrapping_add(self.rng) {
            l += 1;
            msk >>= 1;
            end = self.val.wrapping_add(msk) & !msk;
        }
        while l > 0 {
            self.carry_out((end >> EC_CODE_SHIFT) as i32);
            end = (end << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            l -= EC_SYM_BITS as i32;
        }
        if self.rem >= 0 || self.ext > 0 {
            self.carry_out(0);
        }
        while used >= EC_SYM_BITS as i32 {
            self.write_byte_at_end(window & EC_SYM_MAX);
            window >>= EC_SYM_BITS;
            used -= EC_SYM_BITS as i32;
        }
        if !self.error {
            let start = self.offs as usize;
            let end_idx = (self.storage - self.end_offs) as usize;
            self.buf[start..end_idx].fill(0);
            if used > 0 {
                if self.end_offs >= self.storage {
                    self.error = true;
                } else {
                    let remaining = -l;
                    if self.offs + self.end_offs >= self.storage && remaining < used {
                        window &= (1u32 << remaining.max(0)) - 1;
                        self.error = true;
                    }
                    let idx = (self.storage - self.end_offs - 1) as usize;
                    self.buf[idx] |= window as u8;
                }
            }
        }
        self.end_window = window;
        self.nend_bits = used;
    }

    /// Bytes the flushed stream occupies once the range and raw-bit halves
    /// are joined.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        let (size, _) = self.joined_layout();
        size
    }

    fn joined_layout(&self) -> (usize, usize) {
        let storage = self.storage as usize;
        let offs = self.offs as usize;
        let mut tail = self.end_offs as usize;
        if self.nend_bits > 0 && offs + tail < storage {
            tail += 1;
        }
        ((offs + tail).min(storage), tail)
    }

    /// Joins the two halves of the buffer and returns the finished payload.
    /// Call after [`Self::done`].
    pub fn finish(&mut self) -> &[u8] {
        let storage = self.storage as usize;
        let (size, tail) = self.joined_layout();
        if tail > 0 && size < storage {
            self.buf.copy_within(storage - tail..storage, size - tail);
        }
        &self.buf[..size]
    }
}
