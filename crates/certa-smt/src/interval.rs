//! Closed floating-point intervals with outward rounding.
//!
//! Every operation widens its result by one ulp on each side, so an
//! enclosure computed here contains the exact real result.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Smallest float strictly greater than `x`.
pub fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Largest float strictly smaller than `x`.
pub fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Three-valued truth for a constraint over a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub const ENTIRE: Interval = Interval {
        lo: f64::NEG_INFINITY,
        hi: f64::INFINITY,
    };

    pub fn new(lo: f64, hi: f64) -> Self {
        Interval { lo, hi }
    }

    pub fn point(x: f64) -> Self {
        Interval { lo: x, hi: x }
    }

    fn rounded(lo: f64, hi: f64) -> Self {
        if lo.is_nan() || hi.is_nan() {
            return Interval::ENTIRE;
        }
        Interval {
            lo: next_down(lo),
            hi: next_up(hi),
        }
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn mid(&self) -> f64 {
        if self.lo.is_infinite() || self.hi.is_infinite() {
            if self.lo.is_infinite() && self.hi.is_infinite() {
                return 0.0;
            }
            return if self.lo.is_infinite() { self.hi } else { self.lo };
        }
        self.lo + 0.5 * (self.hi - self.lo)
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lo <= x && x <= self.hi
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0.0)
    }

    /// Intersection, or `self` when the two are disjoint (which only
    /// happens through rounding noise between two valid enclosures).
    pub fn meet(&self, other: &Interval) -> Interval {
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        if lo <= hi {
            Interval { lo, hi }
        } else {
            *self
        }
    }

    /// Split at the midpoint.
    pub fn bisect(&self) -> (Interval, Interval) {
        let m = self.mid();
        (Interval::new(self.lo, m), Interval::new(m, self.hi))
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval::rounded(self.lo + other.lo, self.hi + other.hi)
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        Interval::rounded(self.lo - other.hi, self.hi - other.lo)
    }

    pub fn neg(&self) -> Interval {
        Interval {
            lo: -self.hi,
            hi: -self.lo,
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        let products = [
            mul_bound(self.lo, other.lo),
            mul_bound(self.lo, other.hi),
            mul_bound(self.hi, other.lo),
            mul_bound(self.hi, other.hi),
        ];
        let lo = products.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::rounded(lo, hi)
    }

    pub fn recip(&self) -> Interval {
        if self.contains_zero() {
            return Interval::ENTIRE;
        }
        Interval::rounded(1.0 / self.hi, 1.0 / self.lo)
    }

    pub fn div(&self, other: &Interval) -> Interval {
        self.mul(&other.recip())
    }

    pub fn powi(&self, n: u32) -> Interval {
        match n {
            0 => Interval::point(1.0),
            1 => *self,
            _ if n % 2 == 0 => {
                let (a, b) = (self.lo.abs(), self.hi.abs());
                let hi = a.max(b).powi(n as i32);
                let lo = if self.contains_zero() {
                    0.0
                } else {
                    a.min(b).powi(n as i32)
                };
                // powi is not correctly rounded; widen by a few ulps.
                let r = Interval::rounded(lo, hi);
                Interval::new(next_down(r.lo).max(0.0), next_up(r.hi))
            }
            _ => {
                let r = Interval::rounded(self.lo.powi(n as i32), self.hi.powi(n as i32));
                Interval::new(next_down(r.lo), next_up(r.hi))
            }
        }
    }

    pub fn exp(&self) -> Interval {
        let r = Interval::rounded(self.lo.exp(), self.hi.exp());
        Interval::new(r.lo.max(0.0), r.hi)
    }

    pub fn ln(&self) -> Interval {
        if self.hi <= 0.0 {
            return Interval::ENTIRE;
        }
        let lo = if self.lo <= 0.0 {
            f64::NEG_INFINITY
        } else {
            self.lo.ln()
        };
        Interval::rounded(lo, self.hi.ln())
    }

    pub fn sqrt(&self) -> Interval {
        if self.hi < 0.0 {
            return Interval::ENTIRE;
        }
        let r = Interval::rounded(self.lo.max(0.0).sqrt(), self.hi.sqrt());
        Interval::new(r.lo.max(0.0), r.hi)
    }

    pub fn tanh(&self) -> Interval {
        let r = Interval::rounded(self.lo.tanh(), self.hi.tanh());
        Interval::new(r.lo.max(-1.0), r.hi.min(1.0))
    }

    pub fn sigmoid(&self) -> Interval {
        let s = |x: f64| 1.0 / (1.0 + (-x).exp());
        let r = Interval::rounded(s(self.lo), s(self.hi));
        Interval::new(next_down(r.lo).max(0.0), next_up(r.hi).min(1.0))
    }

    pub fn sin(&self) -> Interval {
        self.sub(&Interval::point(FRAC_PI_2)).cos()
    }

    pub fn cos(&self) -> Interval {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.width() >= TAU {
            return Interval::new(-1.0, 1.0);
        }
        let (a, b) = (self.lo, self.hi);
        let mut lo = a.cos().min(b.cos());
        let mut hi = a.cos().max(b.cos());
        // Maxima at 2kπ, minima at (2k+1)π.
        let k_max = (a / TAU).ceil();
        if k_max * TAU <= b {
            hi = 1.0;
        }
        let k_min = ((a - PI) / TAU).ceil();
        if k_min * TAU + PI <= b {
            lo = -1.0;
        }
        let r = Interval::rounded(lo, hi);
        Interval::new(next_down(r.lo).max(-1.0), next_up(r.hi).min(1.0))
    }

    /// Truth of `self < 0`.
    pub fn lt_zero(&self) -> Truth {
        if self.hi < 0.0 {
            Truth::True
        } else if self.lo >= 0.0 {
            Truth::False
        } else {
            Truth::Unknown
        }
    }

    /// Truth of `self <= 0`.
    pub fn le_zero(&self) -> Truth {
        if self.hi <= 0.0 {
            Truth::True
        } else if self.lo > 0.0 {
            Truth::False
        } else {
            Truth::Unknown
        }
    }

    /// Truth of `self == 0`.
    pub fn eq_zero(&self) -> Truth {
        if self.lo == 0.0 && self.hi == 0.0 {
            Truth::True
        } else if self.contains_zero() {
            Truth::Unknown
        } else {
            Truth::False
        }
    }
}

/// Product of two bounds with `0 * inf = 0`.
fn mul_bound(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}
