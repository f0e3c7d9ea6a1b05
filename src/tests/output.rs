//! Template expansion, directive laws, filters, holds and the deferred print list.

use pretty_assertions::assert_eq;

use super::{run_bytes, run_with};

#[test]
fn percent_and_dollar_escape_themselves() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="100%% %$x %v\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x2a]).expect("parses");
    assert_eq!(out, "100% $x 42\n");
}

#[test]
fn unknown_directives_render_nothing_and_consume_one_character() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%zQ%v\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x2a]).expect("parses");
    assert_eq!(out, "Q42\n");
}

#[test]
fn a_dollar_without_a_hold_name_is_literal() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="$5 %v\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x07]).expect("parses");
    assert_eq!(out, "$5 7\n");
}

#[test]
fn hold_lookup_prefers_the_longest_name() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n"
print name=subst value="$verbose!\n"
structure name=default content-tl=t print=default
tlv tag=1 name=v value-type=string hold=yes
tlv tag=2 name=ver value-type=string hold=yes
tlv tag=3 name=out value-type=string print=subst
structure-end
"#;
    let input = [0x01, 0x01, b'A', 0x02, 0x01, b'B', 0x03, 0x01, b'-'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "A\nB\nBbose!\n");
}

#[test]
fn unassigned_holds_substitute_nothing() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="<$ver> %v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=ver value-type=string hold=yes
tlv tag=2 name=data value-type=string
structure-end
"#;
    // The hold is referenced before its rule has been seen.
    let input = [0x02, 0x01, b'x'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "<> x\n");
}

#[test]
fn interior_newlines_reindent_but_the_terminal_one_does_not() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="a\nb\n" indent="--"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let input = [0x30, 0x03, 0x02, 0x01, 0x2a];
    let out = run_bytes(config, &input).expect("parses");
    // The primitive sits at level 2: one leading indent, one re-indent after the interior newline.
    assert_eq!(out, "--a\n--b\n");
}

#[test]
fn the_separator_joins_deferred_siblings() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%v" separator=","
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=C-1 name=A value-type=string
tlv tag=C-2 name=B value-type=string
structure-end
"#;
    let input = [0x30, 0x08, 0x81, 0x01, b'1', 0x82, 0x03, b'b', b'a', b'r'];
    let out = run_with(config, &input, |engine| {
        engine.add_names("record");
        engine.add_expression("A=.").expect("regex");
    })
    .expect("parses");
    assert_eq!(out, "1,bar");
}

#[test]
fn the_path_directive_shows_the_nesting_location() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%p:%v\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let input = [0x30, 0x03, 0x02, 0x01, 0x2a];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "record:42\n");
}

#[test]
fn start_level_drops_the_outer_layers() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let input = [0x30, 0x03, 0x02, 0x01, 0x2a];
    let out = run_with(config, &input, |engine| {
        engine.set_start_level(2).expect("level");
    })
    .expect("parses");
    assert_eq!(out, "int=42\n");
}

#[test]
fn stop_level_drops_the_inner_layers() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%n=%v\n" constructor="%n{\n" constructor-end="}\n"
structure name=default content-tl=ber print=default
tlv tag=U-16 name=record
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let input = [0x30, 0x03, 0x02, 0x01, 0x2a];
    let out = run_with(config, &input, |engine| {
        engine.set_stop_level(1).expect("level");
    })
    .expect("parses");
    assert_eq!(out, "record{\n}\n");
}

#[test]
fn file_headers_and_trailers_frame_the_output() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%v\n" file-start="<%s>\n" file-end="</%s>\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x01]).expect("parses");
    assert_eq!(out, "<default>\n1\n</default>\n");
}

#[test]
fn item_directives_are_inert_in_file_templates() {
    let config = r#"
tl name=ber tag=ber length=ber
print name=default value="%v\n" file-start="%n%t%v(%s)\n"
structure name=default content-tl=ber print=default
tlv tag=U-2 name=int value-type=int
structure-end
"#;
    let out = run_bytes(config, &[0x02, 0x01, 0x01]).expect("parses");
    assert_eq!(out, "(default)\n1\n");
}

#[test]
fn trimmed_values_lose_surrounding_whitespace() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="<%T>"
structure name=default content-tl=t print=default
tlv tag=1 name=s value-type=string
structure-end
"#;
    let input = [0x01, 0x04, b' ', b'x', b'y', b' '];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "<xy>");
}

#[test]
fn values_are_recoded_when_source_and_target_encodings_are_known() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=s value-type=string encoding=latin1
structure-end
"#;
    let input = [0x01, 0x02, 0xe9, b'!'];
    let out = run_with(config, &input, |engine| engine.set_codeset("UTF-8".to_string())).expect("parses");
    assert_eq!(out, "é!\n");
}

#[test]
fn unknown_encodings_are_fatal() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="%v\n" encoding=no-such-charset
structure name=default content-tl=t print=default
tlv tag=1 name=s value-type=string encoding=latin1
structure-end
"#;
    let err = run_bytes(config, &[0x01, 0x01, b'x']).expect_err("must fail");
    assert_matches::assert_matches!(err.kind(), crate::error::ErrorKind::Recode { .. });
}

#[test]
fn unnamed_elements_use_the_unnamed_template() {
    let config = r#"
tl name=t tag=uint-be,1 length=uint-be,1
print name=default value="N(%n)=%v\n" uvalue="U(%t)=%v\n"
structure name=default content-tl=t print=default
tlv tag=1 name=known value-type=string
structure-end
"#;
    let input = [0x01, 0x01, b'a', 0x02, 0x01, b'b'];
    let out = run_bytes(config, &input).expect("parses");
    assert_eq!(out, "N(known)=a\nU(2)=b\n");
}
