// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
use cynagora_proto::wire::{FrameDecoder, FrameEncoder, ProtoError, MAX_FIELDS};
use cynagora_proto::{exp2txt, txt2exp, IdGenerator};

#[test]
fn a_check_request_round_trips_through_encode_then_decode() {
    let mut encoder = FrameEncoder::new();
    encoder.put_fields(&["check", "q1", "app", "s1", "1000", "audio"]).unwrap();

    let mut buf = Vec::new();
    encoder.write_to(&mut buf).unwrap();

    let mut decoder = FrameDecoder::new();
    decoder.push_bytes(&buf).unwrap();
    let fields = decoder.next_message().unwrap().unwrap();
    assert_eq!(fields, vec!["check", "q1", "app", "s1", "1000", "audio"]);
    assert!(decoder.next_message().unwrap().is_none());
}

#[test]
fn a_field_containing_the_separator_byte_survives_escaping() {
    let mut encoder = FrameEncoder::new();
    encoder.put_fields(&["set", "app with spaces", "*", "1000", "audio", "yes"]).unwrap();

    let mut buf = Vec::new();
    encoder.write_to(&mut buf).unwrap();

    let mut decoder = FrameDecoder::new();
    decoder.push_bytes(&buf).unwrap();
    let fields = decoder.next_message().unwrap().unwrap();
    assert_eq!(fields[1], "app with spaces");
}

#[test]
fn two_messages_written_back_to_back_decode_in_order() {
    let mut encoder = FrameEncoder::new();
    encoder.put_fields(&["done"]).unwrap();
    encoder.put_fields(&["clear", "7"]).unwrap();
    let mut buf = Vec::new();
    encoder.write_to(&mut buf).unwrap();

    let mut decoder = FrameDecoder::new();
    decoder.push_bytes(&buf).unwrap();
    assert_eq!(decoder.next_message().unwrap().unwrap(), vec!["done"]);
    assert_eq!(decoder.next_message().unwrap().unwrap(), vec!["clear", "7"]);
    assert!(decoder.next_message().unwrap().is_none());
}

#[test]
fn too_many_fields_is_rejected_before_it_reaches_the_buffer() {
    let mut encoder = FrameEncoder::new();
    let many: Vec<&str> = std::iter::repeat("x").take(MAX_FIELDS + 1).collect();
    assert_eq!(encoder.put_fields(&many), Err(ProtoError::TooManyFields(many.len())));
}

#[test]
fn an_id_generator_never_hands_out_a_taken_id_twice() {
    let mut gen = IdGenerator::new();
    let mut taken = std::collections::HashSet::new();
    for _ in 0..500 {
        let id = gen.next_unused(&|s| taken.contains(s));
        assert!(taken.insert(id.as_str().to_string()), "id generator repeated an id it already handed out");
    }
}

#[test]
fn expiration_text_round_trips_through_the_codec() {
    let now = 1_000_000;
    let expire = txt2exp("1h", now, true).unwrap();
    let rendered = exp2txt(expire, now, true);
    let reparsed = txt2exp(&rendered, now, true).unwrap();
    assert_eq!(expire, reparsed);
}

#[test]
fn forever_and_do_not_cache_are_distinct_expirations() {
    let now = 1_000_000;
    let forever = txt2exp("forever", now, true).unwrap();
    let do_not_cache = txt2exp("-", now, true).unwrap();
    assert_eq!(forever, 0);
    assert!(do_not_cache < 0);
}
