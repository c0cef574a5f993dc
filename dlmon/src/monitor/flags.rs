//! `dlopen` mode flag decoding

// glibc values; the traced process's flags are decoded, not the monitor's
pub const RTLD_LAZY: i32 = 0x0001;
pub const RTLD_NOW: i32 = 0x0002;
pub const RTLD_NOLOAD: i32 = 0x0004;
pub const RTLD_DEEPBIND: i32 = 0x0008;
pub const RTLD_GLOBAL: i32 = 0x0100;
pub const RTLD_NODELETE: i32 = 0x1000;

/// Known `dlopen` mode bits, in rendering order
const RTLD_FLAGS: &[(i32, &str)] = &[
    (RTLD_LAZY, "RTLD_LAZY"),
    (RTLD_NOW, "RTLD_NOW"),
    (RTLD_NOLOAD, "RTLD_NOLOAD"),
    (RTLD_DEEPBIND, "RTLD_DEEPBIND"),
    (RTLD_GLOBAL, "RTLD_GLOBAL"),
    (RTLD_NODELETE, "RTLD_NODELETE"),
];

/// Rendering of a mode with no bits set
pub const NO_FLAGS: &str = "0";

/// Names of the bits set in `flags`, left to right in a fixed order
///
/// Bits without a name are collected into a trailing `0x..` token.
#[must_use]
pub fn flag_names(flags: i32) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = flags;

    for &(bit, name) in RTLD_FLAGS {
        if flags & bit != 0 {
            names.push(name.to_string());
            rest &= !bit;
        }
    }

    if rest != 0 {
        names.push(format!("0x{rest:x}"));
    }

    names
}

/// `flag_names` joined with `|`, or [`NO_FLAGS`] when nothing is set
#[must_use]
pub fn decode_flags(flags: i32) -> String {
    let names = flag_names(flags);
    if names.is_empty() {
        NO_FLAGS.to_string()
    } else {
        names.join("|")
    }
}

/// Inverse of [`decode_flags`] for the named bits; unknown tokens are skipped
#[must_use]
pub fn split_flags(rendered: &str) -> Vec<String> {
    if rendered.trim() == NO_FLAGS {
        return Vec::new();
    }
    rendered.split('|').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_renders_literal_zero() {
        assert_eq!(decode_flags(0), "0");
    }

    #[test]
    fn test_single_flags() {
        assert_eq!(decode_flags(RTLD_LAZY), "RTLD_LAZY");
        assert_eq!(decode_flags(RTLD_NOW), "RTLD_NOW");
    }

    #[test]
    fn test_order_is_stable_regardless_of_bit_value() {
        let flags = RTLD_NODELETE | RTLD_GLOBAL | RTLD_NOW;
        assert_eq!(decode_flags(flags), "RTLD_NOW|RTLD_GLOBAL|RTLD_NODELETE");
    }

    #[test]
    fn test_unknown_bits_are_kept() {
        let flags = RTLD_LAZY | 0x4000_0000;
        assert_eq!(decode_flags(flags), "RTLD_LAZY|0x40000000");
    }

    #[test]
    fn test_split_flags() {
        assert!(split_flags("0").is_empty());
        assert_eq!(split_flags("RTLD_LAZY|RTLD_GLOBAL"), vec!["RTLD_LAZY", "RTLD_GLOBAL"]);
    }
}
