//! End-to-end parses: full configurations over real byte streams, checking the rendered output.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use super::{run_bytes, run_sized, run_with};
use crate::error::ErrorKind;

const BER_RC: &str = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n" indent="  "
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;

#[test]
fn a_ber_integer_renders_as_decimal() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n = '%v'\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=counter value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x2a]).expect("parses");
    assert_eq!(out, "counter = '42'\n");
}

#[test]
fn nested_indefinite_constructors_close_on_end_of_content() {
    let input = hex::decode("30800201050000").expect("hex");
    let out = run_bytes(BER_RC, &input).expect("parses");
    assert_eq!(out, "[U-16]{\n  int=5\n}\n");
}

#[test]
fn an_unterminated_indefinite_constructor_is_a_premature_eof() {
    let input = hex::decode("3080020105").expect("hex");
    let err = run_bytes(BER_RC, &input).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, .. }
        if message.contains("expecting the file to have 1 end-of-content elements"));
}

#[test]
fn a_short_definite_constructor_reports_the_missing_bytes() {
    let input = [0x30, 0x05, 0x02, 0x01, 0x05];
    let err = run_bytes(BER_RC, &input).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, .. }
        if message.contains("expecting the file to be 2 bytes larger"));
}

#[test]
fn a_child_larger_than_its_parent_is_fatal() {
    // The child claims three value bytes but the enclosing sequence has only one left.
    let input = [0x30, 0x03, 0x02, 0x03, 0x01, 0x02, 0x03];
    let err = run_bytes(BER_RC, &input).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, .. }
        if message.contains("larger than space left in parent element"));
    let context = err.context().expect("item context");
    assert_eq!(context.tag, "U-2");
    assert_eq!(context.length, 3);
}

#[test]
fn a_definite_child_that_exactly_fills_its_parent_is_fine() {
    let input = [0x30, 0x03, 0x02, 0x01, 0x2a];
    let out = run_bytes(BER_RC, &input).expect("parses");
    assert_eq!(out, "[U-16]{\n  int=42\n}\n");
}

#[test]
fn ascii_length_fields_decode_as_decimal_text() {
    let config = r#"
tl name=cdr tag=uint-be,1 length=string,3
print name=default value="%t:%l:%v\n"
structure name=default content-tl=cdr print=default
tlv tag=65 name=rec value-type=string
structure-end
"#;
    let out = run_bytes(config, b"A005hello").expect("parses");
    assert_eq!(out, "65:5:hello\n");
}

#[test]
fn the_name_filter_suppresses_everything_else() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%n=%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=string
tlv tag=2 name=B value-type=string
structure-end
"#;
    let input = [0x01, 0x01, b'a', 0x02, 0x01, b'b'];
    let out = run_with(config, &input, |engine| engine.add_names("A")).expect("parses");
    assert_eq!(out, "A=a\n");
}

#[test]
fn selecting_a_constructor_selects_its_subtree() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=C-1 name=A value-type=string
tlv tag=C-2 name=B value-type=string
structure-end
"#;
    // record { A="1", B="bar" } followed by a top-level A="x".
    let input = [
        0x30, 0x08, 0x81, 0x01, b'1', 0x82, 0x03, b'b', b'a', b'r', 0x81, 0x01, b'x',
    ];
    let out = run_with(config, &input, |engine| engine.add_names("record")).expect("parses");
    assert_eq!(out, "record{\nA=1\nB=bar\n}\n");
}

#[test]
fn misspelled_filter_names_fail_fast() {
    let err = run_with(BER_RC, &[0x02, 0x01, 0x00], |engine| engine.add_names("nosuch")).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Invalid(m) if m.contains("Name not found in tlv names"));
}

#[test]
fn expression_and_gates_whole_blocks() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n" indent="  " \
      block-start="<<\n" block-end=">>\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=C-1 name=A value-type=string
tlv tag=C-2 name=B value-type=string
structure-end
"#;
    // record { A="1", B="bar" }  record { A="1", B="foobar" }
    let input = [
        0x30, 0x08, 0x81, 0x01, b'1', 0x82, 0x03, b'b', b'a', b'r', //
        0x30, 0x0b, 0x81, 0x01, b'1', 0x82, 0x06, b'f', b'o', b'o', b'b', b'a', b'r',
    ];
    let out = run_with(config, &input, |engine| {
        engine.add_names("record");
        engine.add_expression("A=^1$").expect("regex");
        engine.add_expression("B=foo").expect("regex");
        engine.set_expression_and(true);
    })
    .expect("parses");
    assert_eq!(out, "<<\nrecord{\n  A=1\n  B=foobar\n}\n>>\n");
}

#[test]
fn a_single_expression_selects_matching_blocks() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%n=%v\n" block-start="[" block-end="]"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=string
structure-end
"#;
    let input = [0x01, 0x01, b'x', 0x01, 0x01, b'y', 0x01, 0x01, b'x'];
    let out = run_with(config, &input, |engine| {
        engine.add_expression("A=^x$").expect("regex");
    })
    .expect("parses");
    assert_eq!(out, "[A=x\n][A=x\n]");
}

#[test]
fn misspelled_expression_names_fail_fast() {
    let err = run_with(BER_RC, &[0x02, 0x01, 0x00], |engine| {
        engine.add_expression("nosuch=x").expect("regex");
    })
    .expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Invalid(m) if m.contains("Expression name not found"));
}

#[test]
fn bad_expression_patterns_are_rejected() {
    let out = run_with(BER_RC, &[], |engine| {
        engine.add_expression("int=((").expect_err("bad regex");
    })
    .expect("run itself is clean");
    assert_eq!(out, "");
}

#[test]
fn the_bit_string_constructor_probe_advances_one_byte() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n" indent="  "
structure name=default content-tl=ber print=default
tlv tag=U-3 name=bits maybe-constructed=yes
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    // BIT STRING wrapping a SEQUENCE: unused-bits prefix, then the sequence bytes.
    let input = hex::decode("0306003003020105").expect("hex");
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "bits{\n  [U-16]{\n    int=5\n  }\n}\n");
}

#[test]
fn a_plain_bit_string_stays_primitive() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-3 name=bits maybe-constructed=yes value-type=bit-string
structure-end
"#;
    let input = [0x03, 0x02, 0x04, 0b1011_0000];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "bits=1011\n");
}

#[test]
fn the_constructor_probe_upgrades_exact_fits() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=t print=default
tlv tag=9 name=wrap maybe-constructed=yes
tlv tag=1 name=leaf value-type=string
structure-end
"#;
    // Tag 9 length 3 whose value is itself a complete triplet: tag 1 length 1 value 'z'.
    let input = [0x09, 0x03, 0x01, 0x01, b'z'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "wrap{\nleaf=z\n}\n");
}

#[test]
fn fillers_between_triplets_are_skipped() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%n=%v\n"
structure name=default content-tl=t print=default filler="\xff"
tlv tag=1 name=A value-type=string
structure-end
"#;
    let input = [0xff, 0xff, 0x01, 0x01, b'a', 0xff, 0x01, 0x01, b'b', 0xff];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "A=a\nA=b\n");
}

#[test]
fn terminator_delimited_values_consume_their_terminator() {
    let config = r#"
tl name=t tag=uint-be,1 value-term="\x00"
print name=default value="%t:%v\n"
structure name=default content-tl=t print=default
tlv tag=5 end-tag=6 name=s value-type=string
structure-end
"#;
    let input = [0x05, b'a', b'b', b'c', 0x00, 0x06, b'd', 0x00];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "5:abc\n6:d\n");
}

#[test]
fn a_missing_value_terminator_is_fatal() {
    let config = r#"
tl name=t tag=uint-be,1 value-term="\x00"
print name=default value="%v"
structure name=default content-tl=t print=default
structure-end
"#;
    let err = run_bytes(config, &[0x05, b'a', b'b']).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, .. }
        if message.contains("Terminating string was not found"));
}

#[test]
fn tl_included_lengths_are_corrected() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1 tl-included=yes
print name=default value="%l:%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=string
structure-end
"#;
    let input = [0x01, 0x04, b'a', b'b'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "2:ab\n");
}

#[test]
fn negative_length_adjust_never_underflows() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=hex value-length-adjust=-1
tlv tag=2 name=B value-type=hex value-length-adjust=-5
structure-end
"#;
    let input = [0x01, 0x03, 0x61, 0x62, 0x0a, 0x02, 0x03, 0x61, 0x62, 0x0a];
    let out = run_bytes(config, &input).expect("parses");
    // -1 trims the trailing byte; -5 exceeds the length and leaves it untouched.
    assert_eq!(out, "6162\n61620a\n");
}

#[test]
fn type_maps_pick_the_value_kind_from_the_type_field() {
    let config = r#"
typemap name=m
map value=4 value-type=string
map value=2 value-type=hex
typemap-end
tl name=t tag=uint-be,1 type=uint-be,1 length=uint-be,1 type-map=m
print name=default value="%v\n"
structure name=default content-tl=t print=default
structure-end
"#;
    let input = [0x01, 0x04, 0x02, b'a', b'b', 0x01, 0x02, 0x01, 0x41];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "ab\n41\n");
}

#[test]
fn integers_wider_than_sixty_four_bits_render_as_hex() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=uint
structure-end
"#;
    let input = [0x01, 0x09, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "010203040506070809\n");
}

#[test]
fn path_qualified_rules_match_only_at_their_location() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=top
tlv tag=C-0 name=inner type=constructed
tlv tag=U-2 path=top.inner name=X value-type=int
tlv tag=U-2 name=Y value-type=int
structure-end
"#;
    // top { inner { int 5 } }  int 7 — repeated so the lookup cache serves the second round.
    let record = [0x30, 0x05, 0xa0, 0x03, 0x02, 0x01, 0x05, 0x02, 0x01, 0x07];
    let mut input = record.to_vec();
    input.extend_from_slice(&record);
    let out = run_bytes(config, &input).expect("parses");
    let one = "top{\ninner{\nX=5\n}\n}\nY=7\n";
    assert_eq!(out, format!("{}{}", one, one));
}

#[test]
fn suffix_paths_match_the_trailing_components() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=top
tlv tag=C-0 name=inner type=constructed
tlv tag=U-2 path=*inner name=X value-type=int
structure-end
"#;
    let input = [0x30, 0x05, 0xa0, 0x03, 0x02, 0x01, 0x05];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "top{\ninner{\nX=5\n}\n}\n");
}

#[test]
fn rules_can_switch_the_schema_for_a_constructors_children() {
    let config = r#"
tl name=outer tag=uint-be,1 length=uint-be,1
tl name=wide tag=uint-be,2 length=uint-be,2
print name=default value="%t=%v\n" constructor="%t{\n" constructor-end="}\n"
structure name=default content-tl=outer print=default
tlv tag=9 name=wrap type=constructed content-tl=wide
tlv tag=258 name=leaf value-type=string
structure-end
"#;
    // Outer tag 9 length 6; inside, one wide triplet: tag 0x0102 length 0x0002 value "ok".
    let input = [0x09, 0x06, 0x01, 0x02, 0x00, 0x02, b'o', b'k'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "9{\n258=ok\n}\n");
}

#[test]
fn hold_variables_substitute_into_later_templates() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%n=%v\n"
print name=tagged value="[$ver] %v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=ver value-type=string hold=yes
tlv tag=2 name=data value-type=string print=tagged
structure-end
"#;
    let input = [0x01, 0x02, b'v', b'1', 0x02, 0x03, b'a', b'b', b'c'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "ver=v1\n[v1] abc\n");
}

#[test]
fn raw_dump_directives_show_the_wire_bytes() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%d|%D|%v\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x2a]).expect("parses");
    assert_eq!(out, "x02x01|x2a|42\n");
}

#[test]
fn offsets_and_consumed_counts_are_reported() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%o:%O:%c:%>\n"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=string
structure-end
"#;
    let input = [0x01, 0x02, b'a', b'b', 0x01, 0x01, b'c'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "0:0:4:1\n4:4:3:1\n");
}

#[test]
fn streams_larger_than_the_window_are_parsed_in_bounded_memory() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v"
structure name=default content-tl=t print=default
tlv tag=1 name=A value-type=string
structure-end
"#;
    let mut input = Vec::new();
    for _ in 0..50 {
        input.extend_from_slice(&[0x01, 0x01, b'x']);
    }
    let out = run_sized(config, &input, 64, |_| {}).expect("parses");
    assert_eq!(out, "x".repeat(50));
}

#[test]
fn garbage_where_a_tag_should_be_is_reported_with_context() {
    let config = r#"
tl name=t tag=uint-be,2 length=uint-be,2
print name=default value="%v"
structure name=default content-tl=t print=default
structure-end
"#;
    // One byte left where a two-byte tag is needed.
    let err = run_bytes(config, &[0x01]).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, offset, .. }
        if message.contains("Not a valid tag/length") && *offset == 0);
    assert!(err.context().is_some());
}

#[test]
fn a_truncated_value_is_reported_with_context() {
    let err = run_bytes(BER_RC, &[0x02, 0x05, 0x01]).expect_err("must fail");
    assert_matches!(err.kind(), ErrorKind::Parse { message, .. }
        if message.contains("does not contain enough data"));
    let context = err.context().expect("item context");
    assert_eq!(context.tag, "U-2");
    assert_eq!(context.level, 1);
}

#[test]
fn epoch_values_render_through_strftime() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=ts value-type=uint format="++%Y-%m-%d"
structure-end
"#;
    let input = [0x01, 0x04, 0x38, 0x6d, 0x43, 0x80];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "2000-01-01\n");
}
