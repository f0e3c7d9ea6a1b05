//! Printf-style and epoch formatting.

use pretty_assertions::assert_eq;

use crate::fmt::{format_epoch, format_i64, format_u64};

#[test]
fn plain_conversions() {
    assert_eq!(format_i64("%d", 42), "42");
    assert_eq!(format_i64("%i", -42), "-42");
    assert_eq!(format_u64("%u", 42), "42");
    assert_eq!(format_u64("%x", 255), "ff");
    assert_eq!(format_u64("%X", 255), "FF");
    assert_eq!(format_u64("%o", 8), "10");
}

#[test]
fn length_modifiers_are_accepted_and_ignored() {
    assert_eq!(format_i64("%lli", 7), "7");
    assert_eq!(format_u64("%llu", 7), "7");
    assert_eq!(format_i64("%ld", 7), "7");
}

#[test]
fn widths_padding_and_flags() {
    assert_eq!(format_i64("%5d", 42), "   42");
    assert_eq!(format_i64("%-5d!", 42), "42   !");
    assert_eq!(format_i64("%05d", 42), "00042");
    assert_eq!(format_i64("%05d", -42), "-0042");
    assert_eq!(format_i64("%+d", 42), "+42");
    assert_eq!(format_i64("% d", 42), " 42");
    assert_eq!(format_u64("%#x", 255), "0xff");
    assert_eq!(format_u64("%#x", 0), "0");
    assert_eq!(format_i64("%.4d", 42), "0042");
}

#[test]
fn literals_pass_through_and_percent_escapes() {
    assert_eq!(format_i64("value=%d.", 1), "value=1.");
    assert_eq!(format_i64("100%% sure: %d", 5), "100% sure: 5");
    assert_eq!(format_i64("no conversions", 5), "no conversions");
}

#[test]
fn unknown_conversions_stay_visible() {
    assert_eq!(format_i64("%k!", 1), "%k!");
}

#[test]
fn a_trailing_percent_is_kept() {
    assert_eq!(format_i64("50%", 1), "50%");
}

#[test]
fn epoch_formats_need_the_plus_prefix() {
    assert_eq!(format_epoch("++%Y-%m-%dT%H:%M:%S", 946684800).as_deref(), Some("2000-01-01T00:00:00"));
    assert_eq!(format_epoch("++%Y", 0).as_deref(), Some("1970"));
    assert_eq!(format_epoch("%Y", 0), None);
    assert_eq!(format_epoch("%llu", 946684800), None);
}
