use dltrs::DltError;
use dltrs::discretiser::{DiscretisationConfig, EpochDiscretiser};
use dltrs::io::leafmap::{LeafMap, read_leaf_map};
use dltrs::mpr::{count_duplications, lca_map, seed_rates};
use dltrs::tree::{GuestTree, HostTree};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const HOST: &str = "((A:0.5,B:0.5):0.5,C:1.0):0.5;";

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

#[test]
fn leaf_map_parses_two_columns() {
    let map = LeafMap::parse("# guest host\na1\tA\n\n  a2   A\nc C\n").expect("parse failed");
    assert_eq!(map.len(), 3);
    assert_eq!(map.host_of("a2"), Some("A"));
    assert_eq!(map.host_of("zz"), None);

    let err = LeafMap::parse("a1 A\nb\n").expect_err("one column accepted");
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn leaf_map_resolve_errors() {
    let host = HostTree::from_newick(HOST).expect("failed to parse host");
    let guest =
        GuestTree::from_newick("((a:0.5,b:0.5):0.5,c:1.0):0.5;").expect("failed to parse guest");

    let missing = LeafMap::from_pairs([("a", "A"), ("c", "C")]);
    assert_eq!(
        missing.resolve(guest.tree(), host.tree()),
        Err(DltError::UnmappedGuestLeaf("b".to_string()))
    );

    let unknown = LeafMap::from_pairs([("a", "A"), ("b", "D"), ("c", "C")]);
    assert_eq!(
        unknown.resolve(guest.tree(), host.tree()),
        Err(DltError::UnknownHostLeaf("D".to_string()))
    );

    let ok = LeafMap::from_pairs([("a", "B"), ("b", "A"), ("c", "C")]);
    assert_eq!(
        ok.resolve(guest.tree(), host.tree()),
        Ok(vec![Some(1), Some(0), Some(2), None, None])
    );
}

#[test]
fn leaf_map_reads_plain_and_gzip_files() {
    let plain = unique_temp_path("dltrs_leafmap", "txt");
    fs::write(&plain, "a A\nb B\n").expect("failed to write leaf map");
    let map = read_leaf_map(&plain).expect("failed to read leaf map");
    assert_eq!(map.host_of("b"), Some("B"));

    let gz = unique_temp_path("dltrs_leafmap", "txt.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(b"a A\nc C\n").expect("failed to compress");
    fs::write(&gz, enc.finish().expect("failed to finish gzip")).expect("failed to write gzip");
    let map = read_leaf_map(&gz).expect("failed to read gzipped leaf map");
    assert_eq!(map.host_of("c"), Some("C"));

    let _ = fs::remove_file(plain);
    let _ = fs::remove_file(gz);
}

#[test]
fn lca_mapping_counts_duplications() {
    let host = HostTree::from_newick(HOST).expect("failed to parse host");
    let guest = GuestTree::from_newick("((a1:0.3,a2:0.3):0.7,(b:0.5,c:0.5):0.5):0.5;")
        .expect("failed to parse guest");
    let sigma = LeafMap::from_pairs([("a1", "A"), ("a2", "A"), ("b", "B"), ("c", "C")])
        .resolve(guest.tree(), host.tree())
        .expect("failed to resolve");
    let map = lca_map(&guest, &host, &sigma).expect("failed to map");

    let a_pair = guest.tree().parent(0).expect("a1 has a parent");
    let bc = guest.tree().parent(2).expect("b has a parent");
    let root = guest.tree().root();
    assert_eq!(map[a_pair], 0);
    assert_eq!(map[bc], host.tree().root());
    assert_eq!(map[root], host.tree().root());
    assert_eq!(count_duplications(&guest, &map), 2);
}

#[test]
fn seeded_rates_scale_with_duplications() {
    let host = HostTree::from_newick(HOST).expect("failed to parse host");
    let disc = EpochDiscretiser::new(&host, DiscretisationConfig::fixed(2))
        .expect("failed to discretise");
    let none = seed_rates(&disc, 0).expect("seeding failed");
    approx_eq(none.duplication, 1e-3, 1e-15);
    approx_eq(none.loss, 1e-3, 1e-15);
    approx_eq(none.transfer, 1e-3, 1e-15);

    let three = seed_rates(&disc, 3).expect("seeding failed");
    approx_eq(three.duplication, 0.5 + 1e-3, 1e-12);
    approx_eq(three.loss, 1.0 + 1e-3, 1e-12);
    approx_eq(three.transfer, 0.5 + 1e-3, 1e-12);
}
