use substreams_sink::pb::substreams::v1::Module;
use substreams_sink::{BlockRange, SinkError, read_block_range};

fn module_starting_at(initial_block: u64) -> Module {
    Module {
        initial_block,
        ..Default::default()
    }
}

#[test]
fn range_expressions_resolve_against_the_module_start() {
    let module = module_starting_at(5);

    let cases: &[(&str, BlockRange)] = &[
        ("", BlockRange::open(5)),
        ("-1", BlockRange::open(5)),
        (":", BlockRange::open(5)),
        ("11", BlockRange::bounded(5, 11).unwrap()),
        ("+10", BlockRange::bounded(5, 15).unwrap()),
        ("10:+10", BlockRange::bounded(10, 20).unwrap()),
        ("+10:+10", BlockRange::bounded(15, 25).unwrap()),
        ("10:", BlockRange::open(10)),
        ("10:-1", BlockRange::open(10)),
        (":11", BlockRange::bounded(5, 11).unwrap()),
    ];

    for (input, expected) in cases {
        assert_eq!(
            read_block_range(&module, input).unwrap(),
            *expected,
            "input {input:?}"
        );
    }
}

#[test]
fn empty_ranges_are_rejected() {
    let module = module_starting_at(5);

    for input in ["10:10", "20:10", "3"] {
        assert!(
            matches!(
                read_block_range(&module, input),
                Err(SinkError::InvalidRange(_))
            ),
            "input {input:?} should be rejected"
        );
    }
}

#[test]
fn zero_and_negative_stop_values_fall_back_to_the_open_range() {
    let module = module_starting_at(5);

    assert_eq!(read_block_range(&module, "0").unwrap(), BlockRange::open(5));
    assert_eq!(read_block_range(&module, "-5").unwrap(), BlockRange::open(5));
}
