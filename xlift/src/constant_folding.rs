//! Constant folding over symbolic expressions.
//!
//! Integer arithmetic is two's-complement and wraps at the width of the operands: 32 bits unless
//! a constant explicitly carries a wider width. Division by zero, out-of-range shifts and operators
//! without a constant meaning are not foldable.
//!
//! [`fold`] is the implementation used by the lifter; [`evaluate`] computes the same result over
//! exact 128-bit integers, reducing to the width after each operation, and serves as the
//! reference that `fold` must agree with.

use crate::xvalue::{Width, XConstant, XOp, XXpr};

/// Reduce `v` to `width` bits and sign-extend it back to an `i64`.
pub fn normalize(v: i64, width: Width) -> i64 {
    match width {
        Width::W32 => v as i32 as i64,
        Width::W64 => v,
    }
}

/// Extend the low `from_bits` of `v`, sign-extending if `signed`, zero-extending otherwise.
pub fn widen(v: i64, from_bits: u32, signed: bool) -> i64 {
    if from_bits == 0 || from_bits >= 64 {
        return v;
    }
    let shift = 64 - from_bits;
    if signed {
        (v << shift) >> shift
    } else {
        ((v as u64) << shift >> shift) as i64
    }
}

fn width_of(args: &[XConstant]) -> Width {
    args.iter()
        .map(|c| c.width())
        .fold(Width::W32, Width::join)
}

fn int(value: i64, width: Width) -> XConstant {
    XConstant::Int {
        value: normalize(value, width),
        width,
    }
}

/// Fold a constant-only expression, or `None` if it is not constant (or not foldable).
pub fn fold(x: &XXpr) -> Option<XConstant> {
    match x {
        XXpr::Constant(c) => Some(c.clone()),
        XXpr::Var(_) => None,
        XXpr::Compound(op, args) => {
            let args = args.iter().map(fold).collect::<Option<Vec<_>>>()?;
            fold_op(*op, &args)
        }
    }
}

fn fold_op(op: XOp, args: &[XConstant]) -> Option<XConstant> {
    let w = width_of(args);
    if op.is_unary() {
        let [a] = args else { return None };
        let a = normalize(a.value(), w);
        return Some(match op {
            XOp::Neg => int(a.wrapping_neg(), w),
            XOp::BNot => int(!a, w),
            XOp::LNot => int((a == 0) as i64, Width::W32),
            XOp::Lsb => int(a & 0xff, w),
            XOp::Lsh => int(a & 0xffff, w),
            _ => return None,
        });
    }
    let [a, b] = args else { return None };
    let (a, b) = (normalize(a.value(), w), normalize(b.value(), w));
    macro_rules! wrapping {
        ($m32:ident, $m64:ident) => {
            match w {
                Width::W32 => (a as i32).$m32(b as i32) as i64,
                Width::W64 => a.$m64(b),
            }
        };
    }
    let shift_amount = || u32::try_from(b).ok().filter(|s| *s < w.bits());
    let r = match op {
        XOp::Plus => wrapping!(wrapping_add, wrapping_add),
        XOp::Minus => wrapping!(wrapping_sub, wrapping_sub),
        XOp::Mult => wrapping!(wrapping_mul, wrapping_mul),
        XOp::Div if b != 0 => wrapping!(wrapping_div, wrapping_div),
        XOp::Mod if b != 0 => wrapping!(wrapping_rem, wrapping_rem),
        XOp::Div | XOp::Mod => return None,
        XOp::BAnd => a & b,
        XOp::BOr => a | b,
        XOp::BXor => a ^ b,
        XOp::ShiftLt | XOp::Lsl => {
            let s = shift_amount()?;
            match w {
                Width::W32 => ((a as i32) << s) as i64,
                Width::W64 => a << s,
            }
        }
        XOp::ShiftRt | XOp::Asr => {
            let s = shift_amount()?;
            a >> s
        }
        XOp::Lsr => {
            let s = shift_amount()?;
            match w {
                Width::W32 => ((a as u32) >> s) as i32 as i64,
                Width::W64 => ((a as u64) >> s) as i64,
            }
        }
        XOp::XByte => {
            let s = u32::try_from(a).ok().filter(|n| *n < w.bits() / 8)? * 8;
            (b >> s) & 0xff
        }
        XOp::Eq => return Some(int((a == b) as i64, Width::W32)),
        XOp::Ne => return Some(int((a != b) as i64, Width::W32)),
        XOp::Lt => return Some(int((a < b) as i64, Width::W32)),
        XOp::Le => return Some(int((a <= b) as i64, Width::W32)),
        XOp::Gt => return Some(int((a > b) as i64, Width::W32)),
        XOp::Ge => return Some(int((a >= b) as i64, Width::W32)),
        XOp::LAnd => return Some(int((a != 0 && b != 0) as i64, Width::W32)),
        XOp::LOr => return Some(int((a != 0 || b != 0) as i64, Width::W32)),
        XOp::Range => return None,
        XOp::Neg | XOp::BNot | XOp::LNot | XOp::Lsb | XOp::Lsh => return None,
    };
    Some(int(r, w))
}

/// Directly evaluate a constant-only expression over exact integers.
pub fn evaluate(x: &XXpr) -> Option<XConstant> {
    let (v, w) = eval_exact(x)?;
    Some(int(v as i64, w))
}

fn reduce(v: i128, w: Width) -> i128 {
    let m = 1i128 << w.bits();
    let r = v.rem_euclid(m);
    if r >= m / 2 {
        r - m
    } else {
        r
    }
}

fn eval_exact(x: &XXpr) -> Option<(i128, Width)> {
    match x {
        XXpr::Constant(c) => Some((reduce(c.value() as i128, c.width()), c.width())),
        XXpr::Var(_) => None,
        XXpr::Compound(op, args) => {
            let vals = args.iter().map(eval_exact).collect::<Option<Vec<_>>>()?;
            let w = vals.iter().map(|(_, w)| *w).fold(Width::W32, Width::join);
            let vs: Vec<i128> = vals.iter().map(|(v, _)| reduce(*v, w)).collect();
            let bits = w.bits() as i128;
            let unsigned = |v: i128| v.rem_euclid(1i128 << bits);
            let truth = |b: bool| Some((b as i128, Width::W32));
            let r = match (op, &vs[..]) {
                (XOp::Neg, [a]) => -a,
                (XOp::BNot, [a]) => -a - 1,
                (XOp::LNot, [a]) => return truth(*a == 0),
                (XOp::Lsb, [a]) => unsigned(*a) % 256,
                (XOp::Lsh, [a]) => unsigned(*a) % 65536,
                (XOp::Plus, [a, b]) => a + b,
                (XOp::Minus, [a, b]) => a - b,
                (XOp::Mult, [a, b]) => a * b,
                (XOp::Div, [_, 0]) | (XOp::Mod, [_, 0]) => return None,
                // Truncating division, as in C
                (XOp::Div, [a, b]) => a / b,
                (XOp::Mod, [a, b]) => a % b,
                (XOp::BAnd, [a, b]) => a & b,
                (XOp::BOr, [a, b]) => a | b,
                (XOp::BXor, [a, b]) => a ^ b,
                (XOp::ShiftLt | XOp::Lsl, [a, b]) if (0..bits).contains(b) => a * (1i128 << b),
                (XOp::ShiftRt | XOp::Asr, [a, b]) if (0..bits).contains(b) => {
                    a.div_euclid(1i128 << b)
                }
                (XOp::Lsr, [a, b]) if (0..bits).contains(b) => unsigned(*a) / (1i128 << b),
                (XOp::XByte, [n, v]) if (0..bits / 8).contains(n) => {
                    unsigned(*v) / (1i128 << (8 * n)) % 256
                }
                (XOp::Eq, [a, b]) => return truth(a == b),
                (XOp::Ne, [a, b]) => return truth(a != b),
                (XOp::Lt, [a, b]) => return truth(a < b),
                (XOp::Le, [a, b]) => return truth(a <= b),
                (XOp::Gt, [a, b]) => return truth(a > b),
                (XOp::Ge, [a, b]) => return truth(a >= b),
                (XOp::LAnd, [a, b]) => return truth(*a != 0 && *b != 0),
                (XOp::LOr, [a, b]) => return truth(*a != 0 || *b != 0),
                _ => return None,
            };
            Some((reduce(r, w), w))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EDGES: [i64; 12] = [
        0,
        1,
        -1,
        2,
        7,
        31,
        32,
        0x7fff_ffff,
        -0x8000_0000,
        0x1234_5678,
        -0x1234_5678,
        0xff,
    ];

    const BINOPS: [XOp; 22] = [
        XOp::Plus,
        XOp::Minus,
        XOp::Mult,
        XOp::Div,
        XOp::Mod,
        XOp::BAnd,
        XOp::BOr,
        XOp::BXor,
        XOp::Eq,
        XOp::Ne,
        XOp::Lt,
        XOp::Le,
        XOp::Gt,
        XOp::Ge,
        XOp::LAnd,
        XOp::LOr,
        XOp::ShiftLt,
        XOp::ShiftRt,
        XOp::Lsl,
        XOp::Lsr,
        XOp::Asr,
        XOp::XByte,
    ];

    #[test]
    fn fold_agrees_with_evaluate_on_edge_values() {
        for op in BINOPS {
            for a in EDGES {
                for b in EDGES {
                    let x = XXpr::binary(op, XXpr::int(a), XXpr::int(b));
                    assert_eq!(fold(&x), evaluate(&x), "{} {} {}", a, op.name(), b);
                }
            }
        }
        for op in [XOp::Neg, XOp::BNot, XOp::LNot, XOp::Lsb, XOp::Lsh] {
            for a in EDGES {
                let x = XXpr::Compound(op, vec![XXpr::int(a)]);
                assert_eq!(fold(&x), evaluate(&x), "{} {}", op.name(), a);
            }
        }
    }

    #[test]
    fn overflow_wraps_at_32_bits() {
        let x = XXpr::binary(XOp::Plus, XXpr::int(0x7fff_ffff), XXpr::int(1));
        assert_eq!(fold(&x).map(|c| c.value()), Some(-0x8000_0000));
        let y = XXpr::binary(XOp::Div, XXpr::int(-0x8000_0000), XXpr::int(-1));
        assert_eq!(fold(&y).map(|c| c.value()), Some(-0x8000_0000));
    }

    #[test]
    fn wider_constants_fold_at_64_bits() {
        let big = XXpr::Constant(XConstant::Int {
            value: 0x7fff_ffff,
            width: Width::W64,
        });
        let x = XXpr::binary(XOp::Plus, big, XXpr::int(1));
        assert_eq!(fold(&x).map(|c| c.value()), Some(0x8000_0000));
        assert_eq!(fold(&x), evaluate(&x));
    }

    #[test]
    fn unfoldable_expressions() {
        let x = XXpr::binary(XOp::Div, XXpr::int(1), XXpr::int(0));
        assert_eq!(fold(&x), None);
        assert_eq!(evaluate(&x), None);
        let s = XXpr::binary(XOp::ShiftLt, XXpr::int(1), XXpr::int(32));
        assert_eq!(fold(&s), None);
    }

    #[test]
    fn widening_follows_signedness() {
        assert_eq!(widen(0xff, 8, true), -1);
        assert_eq!(widen(0xff, 8, false), 0xff);
        assert_eq!(widen(-1, 16, false), 0xffff);
    }
}
