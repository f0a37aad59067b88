use super::*;

// -------------------- Helpers --------------------

fn set_of(ids: &[CampaignId]) -> CampaignSet {
    ids.iter().copied().collect()
}

fn added(campaign: CampaignId, previous: Option<&[u8]>) -> Vec<u8> {
    let applied = apply(Operation::Add, campaign, previous).unwrap();
    applied.value.unwrap().into_owned()
}

// -------------------- Encoding --------------------

#[test]
fn encode_decode_preserves_insertion_order() {
    let set = set_of(&[42, 7, 1_000_000, 0, u32::MAX]);
    let bytes = encode(&set);

    assert_eq!(bytes.len(), 9 + 5 * 4);
    assert_eq!(decode(&bytes).unwrap().as_slice(), &[42, 7, 1_000_000, 0, u32::MAX]);
}

#[test]
fn empty_set_round_trips() {
    let bytes = encode(&CampaignSet::new());
    assert_eq!(bytes.len(), 9);
    assert!(decode(&bytes).unwrap().is_empty());
}

#[test]
fn encode_into_reuses_buffer() {
    let mut buf = Vec::with_capacity(128);
    encode_into(&set_of(&[1, 2, 3]), &mut buf);
    let first = buf.clone();

    encode_into(&set_of(&[9]), &mut buf);
    assert_eq!(decode(&buf).unwrap().as_slice(), &[9]);
    assert_eq!(decode(&first).unwrap().as_slice(), &[1, 2, 3]);
    assert!(buf.capacity() >= 128);
}

#[test]
fn from_iter_drops_repeats() {
    let set = set_of(&[3, 1, 3, 2, 1]);
    assert_eq!(set.as_slice(), &[3, 1, 2]);
}

// -------------------- Corruption --------------------

#[test]
fn decode_rejects_short_buffer() {
    assert_eq!(decode(b"").unwrap_err(), CodecError::Truncated { len: 0 });
    assert_eq!(decode(&[1, 0, 0]).unwrap_err(), CodecError::Truncated { len: 3 });
}

#[test]
fn decode_rejects_unknown_version() {
    let mut bytes = encode(&set_of(&[1]));
    bytes[0] = 9;
    assert_eq!(decode(&bytes).unwrap_err(), CodecError::UnknownVersion(9));
}

#[test]
fn decode_rejects_length_mismatch() {
    let mut bytes = encode(&set_of(&[1, 2]));
    bytes.truncate(bytes.len() - 1);
    assert!(matches!(
        decode(&bytes).unwrap_err(),
        CodecError::LengthMismatch { expected: 17, actual: 16 }
    ));
}

#[test]
fn decode_detects_flipped_bit() {
    let mut bytes = encode(&set_of(&[5, 6]));
    bytes[6] ^= 0x01;
    assert!(matches!(
        decode(&bytes).unwrap_err(),
        CodecError::ChecksumMismatch { .. }
    ));
}

#[test]
fn decode_rejects_json_arrays() {
    assert!(decode(b"[1,2,3]").is_err());
}

#[test]
fn decode_rejects_duplicates_even_with_valid_checksum() {
    // Hand-build a record with a repeated campaign and a correct CRC.
    let mut bytes = vec![FORMAT_VERSION];
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(&4u32.to_le_bytes());
    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    bytes.extend_from_slice(&hasher.finalize().to_le_bytes());

    assert_eq!(decode(&bytes).unwrap_err(), CodecError::DuplicateCampaign(4));
}

// -------------------- apply: absent previous --------------------

#[test]
fn add_to_absent_creates_singleton() {
    let applied = apply(Operation::Add, 3, None).unwrap();
    assert!(applied.changed);
    assert_eq!(decode(&applied.value.unwrap()).unwrap().as_slice(), &[3]);
}

#[test]
fn remove_from_absent_is_noop() {
    let applied = apply(Operation::Remove, 3, None).unwrap();
    assert_eq!(
        applied,
        Applied {
            value: None,
            changed: false
        }
    );
}

// -------------------- apply: present previous --------------------

#[test]
fn add_appends_new_campaign_last() {
    let v = added(10, None);
    let v = added(2, Some(&v));
    let v = added(7, Some(&v));
    assert_eq!(decode(&v).unwrap().as_slice(), &[10, 2, 7]);
}

#[test]
fn add_is_idempotent() {
    for start in [None, Some(encode(&set_of(&[1, 2]))), Some(encode(&set_of(&[9])))] {
        let once = added(9, start.as_deref());
        let twice = apply(Operation::Add, 9, Some(&once)).unwrap();
        assert!(!twice.changed);
        assert_eq!(twice.value.as_deref(), Some(once.as_slice()));
    }
}

#[test]
fn unchanged_result_borrows_previous() {
    let previous = encode(&set_of(&[4]));
    let applied = apply(Operation::Add, 4, Some(&previous)).unwrap();
    assert!(matches!(applied.value, Some(Cow::Borrowed(_))));
}

#[test]
fn remove_after_add_restores_original_set() {
    let cases: [(&[CampaignId], CampaignId); 4] =
        [(&[1, 2, 3], 2), (&[1, 2, 3], 4), (&[], 5), (&[5], 5)];

    for (ids, campaign) in cases {
        let start = encode(&set_of(ids));
        let with = added(campaign, Some(&start));

        let applied = apply(Operation::Remove, campaign, Some(&with)).unwrap();
        assert!(applied.changed);

        let expected: Vec<CampaignId> = ids.iter().copied().filter(|&c| c != campaign).collect();
        assert_eq!(decode(&applied.value.unwrap()).unwrap().into_vec(), expected);
    }
}

#[test]
fn remove_missing_campaign_is_noop() {
    let previous = encode(&set_of(&[1, 2]));
    let applied = apply(Operation::Remove, 3, Some(&previous)).unwrap();
    assert!(!applied.changed);
    assert_eq!(applied.value.as_deref(), Some(previous.as_slice()));
}

#[test]
fn removing_last_campaign_keeps_empty_record() {
    let v = added(8, None);
    let applied = apply(Operation::Remove, 8, Some(&v)).unwrap();
    assert!(applied.changed);
    let value = applied.value.unwrap();
    assert!(decode(&value).unwrap().is_empty());
}

#[test]
fn apply_surfaces_corruption() {
    let garbage = b"not a record at all";
    assert!(apply(Operation::Add, 1, Some(garbage)).is_err());
    assert!(apply(Operation::Remove, 1, Some(garbage)).is_err());
}

// -------------------- Operation parsing --------------------

#[test]
fn operation_parses_and_displays() {
    assert_eq!("add".parse::<Operation>().unwrap(), Operation::Add);
    assert_eq!("REMOVE".parse::<Operation>().unwrap(), Operation::Remove);
    assert!("toggle".parse::<Operation>().is_err());
    assert_eq!(Operation::Remove.to_string(), "remove");
}
