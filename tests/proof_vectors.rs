//! Proof-of-inclusion vectors for the canonical eight-leaf tree
//! (keys 0x00..0x07, values 0x1N 0x0N), checked against fixed hashes and
//! the stable serialized program bytes peers consume.

use canopy::store::DataStore;
use canopy::types::{bytes32_from_hex, Bytes32, Side, Status};

const STORE_ID: Bytes32 = [0x31; 32];

async fn build_canonical_tree(store: &DataStore) {
    let insert = |key: &'static [u8], value: &'static [u8], reference: Option<Bytes32>, side: Option<Side>| async move {
        store
            .insert(key, value, STORE_ID, reference, side, Status::Committed)
            .await
            .unwrap()
    };

    let g = insert(b"\x06", b"\x16\x06", None, None).await;
    let c = insert(b"\x02", b"\x12\x02", Some(g), Some(Side::Left)).await;
    let b = insert(b"\x01", b"\x11\x01", Some(c), Some(Side::Left)).await;
    insert(b"\x03", b"\x13\x03", Some(c), Some(Side::Right)).await;
    insert(b"\x00", b"\x10\x00", Some(b), Some(Side::Left)).await;
    let f = insert(b"\x05", b"\x15\x05", Some(g), Some(Side::Left)).await;
    insert(b"\x07", b"\x17\x07", Some(g), Some(Side::Right)).await;
    insert(b"\x04", b"\x14\x04", Some(f), Some(Side::Left)).await;
}

#[tokio::test]
async fn test_proof_layers_match_fixed_hashes() {
    let store = DataStore::in_memory().unwrap();
    store.create_store(STORE_ID, Status::Committed).await.unwrap();
    build_canonical_tree(&store).await;

    let proof = store.proof_of_inclusion_by_key(b"\x04", STORE_ID).await.unwrap();

    let expected = [
        (
            Side::Right,
            "fb66fe539b3eb2020dfbfadfd601fa318521292b41f04c2057c16fca6b947ca1",
            "36cb1fc56017944213055da8cb0178fb0938c32df3ec4472f5edf0dff85ba4a3",
        ),
        (
            Side::Right,
            "6d3af8d93db948e8b6aa4386958e137c6be8bab726db86789594b3588b35adcd",
            "5f67a0ab1976e090b834bf70e5ce2a0f0a9cd474e19a905348c44ae12274d30b",
        ),
        (
            Side::Left,
            "c852ecd8fb61549a0a42f9eb9dde65e6c94a01934dbd9c1d35ab94e2a0ae58e2",
            "7a5193a4e31a0a72f6623dfeb2876022ab74a48abb5966088a1c6f5451cc5d81",
        ),
    ];

    assert_eq!(proof.layers.len(), expected.len());
    for (layer, (side, other_hex, combined_hex)) in proof.layers.iter().zip(expected) {
        assert_eq!(layer.other_hash_side, side);
        assert_eq!(layer.other_hash, bytes32_from_hex(other_hex).unwrap());
        assert_eq!(layer.combined_hash, bytes32_from_hex(combined_hex).unwrap());
    }

    assert!(proof.valid());
    let root = store.get_tree_root(&STORE_ID, None).await.unwrap();
    assert_eq!(proof.root_hash(), root.node_hash.unwrap());
}

#[tokio::test]
async fn test_proof_program_bytes_are_stable() {
    let store = DataStore::in_memory().unwrap();
    store.create_store(STORE_ID, Status::Committed).await.unwrap();
    build_canonical_tree(&store).await;

    let proof = store.proof_of_inclusion_by_key(b"\x04", STORE_ID).await.unwrap();

    let mut expected = hex::decode("ff04ff").unwrap();
    for other_hex in [
        "fb66fe539b3eb2020dfbfadfd601fa318521292b41f04c2057c16fca6b947ca1",
        "6d3af8d93db948e8b6aa4386958e137c6be8bab726db86789594b3588b35adcd",
        "c852ecd8fb61549a0a42f9eb9dde65e6c94a01934dbd9c1d35ab94e2a0ae58e2",
    ] {
        expected.push(0xff);
        expected.push(0xa0);
        expected.extend(hex::decode(other_hex).unwrap());
    }
    expected.extend([0x80, 0x80]);

    assert_eq!(proof.as_program_bytes(), expected);
}
