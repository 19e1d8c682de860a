use dltrs::DltError;
use dltrs::discretiser::DiscretisationConfig;
use dltrs::engine::{Change, EngineConfig, ReconciliationEngine};
use dltrs::io::leafmap::LeafMap;
use dltrs::probs::DltRates;
use dltrs::rates::EdgeRateDensity;
use dltrs::tree::{GuestTree, HostTree};

const HOST: &str = "((A:0.5,B:0.5):0.5,C:1.0):0.5;";
const GUEST: &str = "((a:0.5,b:0.5):0.5,c:1.0):0.5;";

fn leaf_map() -> LeafMap {
    LeafMap::from_pairs([("a", "A"), ("b", "B"), ("c", "C")])
}

fn rates(d: f64, l: f64, t: f64) -> DltRates {
    DltRates::new(d, l, t).expect("invalid rates")
}

fn engine_with(guest: &str, rates: DltRates, n: usize) -> ReconciliationEngine {
    let host = HostTree::from_newick(HOST).expect("failed to parse host tree");
    let guest = GuestTree::from_newick(guest).expect("failed to parse guest tree");
    let mut config = EngineConfig::new(rates);
    config.discretisation = DiscretisationConfig::fixed(n);
    ReconciliationEngine::new(host, guest, leaf_map(), config).expect("failed to build engine")
}

fn engine(rates: DltRates, n: usize) -> ReconciliationEngine {
    engine_with(GUEST, rates, n)
}

fn table_bits(engine: &ReconciliationEngine) -> Vec<u64> {
    let n = engine.guest().tree().n_vertices();
    (0..n)
        .flat_map(|u| {
            let t = engine.model().tables(u);
            t.at.values().chain(t.below.values()).collect::<Vec<_>>()
        })
        .map(f64::to_bits)
        .collect()
}

#[test]
fn likelihood_is_positive_and_finite() {
    let e = engine(rates(0.1, 0.1, 0.05), 2);
    let p = e.likelihood();
    assert!(p > 0.0 && p.is_finite(), "likelihood {p}");
    assert!(p < 1.0e6);
}

#[test]
fn high_duplication_rate_lowers_likelihood() {
    let low = engine(rates(0.1, 0.1, 0.0), 2).likelihood();
    let high = engine(rates(2.0, 0.1, 0.0), 2).likelihood();
    assert!(low > 0.0 && high > 0.0);
    assert!(low > high, "dup=0.1 gave {low}, dup=2.0 gave {high}");
}

#[test]
fn partial_update_matches_full_rebuild() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    let changed = vec![0];
    e.cache(&Change::Lengths(Some(changed.clone())));
    e.set_length(0, 0.7);
    let partial = e
        .recompute(&Change::Lengths(Some(changed)))
        .expect("partial recompute failed");

    let fresh = engine_with("((a:0.7,b:0.5):0.5,c:1.0):0.5;", rates(0.2, 0.1, 0.1), 3);
    assert_eq!(partial.to_bits(), fresh.likelihood().to_bits());
    assert_eq!(table_bits(&e), table_bits(&fresh));

    let mut full = engine(rates(0.2, 0.1, 0.1), 3);
    full.cache(&Change::Lengths(None));
    full.set_length(0, 0.7);
    let all = full
        .recompute(&Change::Lengths(None))
        .expect("full recompute failed");
    assert_eq!(all.to_bits(), partial.to_bits());
}

#[test]
fn restore_after_rate_change_is_bitwise() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    let p0 = e.likelihood();
    let tables = table_bits(&e);

    e.cache(&Change::Rates);
    e.set_rates(rates(0.8, 0.3, 0.4)).expect("invalid rates");
    let p1 = e.recompute(&Change::Rates).expect("recompute failed");
    assert_ne!(p0.to_bits(), p1.to_bits());

    e.restore_cache();
    assert_eq!(e.likelihood().to_bits(), p0.to_bits());
    assert_eq!(table_bits(&e), tables);
    assert_eq!(e.rates(), rates(0.2, 0.1, 0.1));
}

#[test]
fn restore_after_length_change_is_bitwise() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    let p0 = e.likelihood();
    let tables = table_bits(&e);

    let change = Change::Lengths(Some(vec![2]));
    e.cache(&change);
    e.set_length(2, 0.3);
    e.recompute(&change).expect("recompute failed");
    e.restore_cache();

    assert_eq!(e.likelihood().to_bits(), p0.to_bits());
    assert_eq!(table_bits(&e), tables);
    assert_eq!(e.guest().length(2), 1.0);
}

#[test]
fn restore_after_host_change_is_bitwise() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    let p0 = e.likelihood();
    let tables = table_bits(&e);

    e.cache(&Change::Host);
    e.set_host_times(vec![0.0, 0.0, 0.0, 0.7, 1.0], 0.4)
        .expect("failed to set host times");
    let p1 = e.recompute(&Change::Host).expect("recompute failed");
    assert!(p1.is_finite());
    assert_ne!(p0.to_bits(), p1.to_bits());

    e.restore_cache();
    assert_eq!(e.likelihood().to_bits(), p0.to_bits());
    assert_eq!(table_bits(&e), tables);
    assert_eq!(e.host().top_time(), 1.5);
}

#[test]
fn topology_change_and_restore() {
    let mut e = engine(rates(0.2, 0.1, 0.3), 3);
    let p0 = e.likelihood();

    e.cache(&Change::Topology);
    let swapped =
        GuestTree::from_newick("((a:0.5,c:0.5):0.5,b:1.0):0.5;").expect("failed to parse guest");
    e.set_guest_tree(swapped).expect("failed to set guest tree");
    let p1 = e.recompute(&Change::Topology).expect("recompute failed");
    assert!(p1.is_finite() && p1 >= 0.0);
    assert_ne!(p0.to_bits(), p1.to_bits());

    e.restore_cache();
    assert_eq!(e.likelihood().to_bits(), p0.to_bits());
    assert_eq!(e.guest().tree().name(2), Some("c"));
}

#[test]
fn guest_tree_with_other_size_is_rejected() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 2);
    let bigger = GuestTree::from_newick("(((a:0.2,a2:0.2):0.3,b:0.5):0.5,c:1.0):0.5;")
        .expect("failed to parse guest");
    assert_eq!(
        e.set_guest_tree(bigger),
        Err(DltError::VertexCountMismatch {
            expected: 5,
            found: 7
        })
    );
}

#[test]
fn cache_then_clear_keeps_new_state() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    e.cache(&Change::Rates);
    e.set_rates(rates(0.5, 0.1, 0.1)).expect("invalid rates");
    let p1 = e.recompute(&Change::Rates).expect("recompute failed");
    e.clear_cache();
    e.restore_cache();
    assert_eq!(e.likelihood().to_bits(), p1.to_bits());
}

#[test]
fn rate_density_change_is_picked_up() {
    let mut e = engine(rates(0.2, 0.1, 0.1), 3);
    let p0 = e.likelihood();
    e.cache(&Change::RateDensity);
    e.set_rate_density(EdgeRateDensity::Gamma { mean: 2.0, cv: 0.5 })
        .expect("invalid density");
    let p1 = e.recompute(&Change::RateDensity).expect("recompute failed");
    assert_ne!(p0.to_bits(), p1.to_bits());
    e.restore_cache();
    assert_eq!(e.likelihood().to_bits(), p0.to_bits());
    assert!(
        e.set_rate_density(EdgeRateDensity::Gamma { mean: -1.0, cv: 1.0 })
            .is_err()
    );
}

#[test]
fn refining_the_grid_converges() {
    let r = rates(0.1, 0.1, 0.05);
    let coarse = engine(r, 10).likelihood();
    let fine = engine(r, 40).likelihood();
    let rel = (coarse - fine).abs() / fine;
    assert!(rel < 0.05, "coarse {coarse}, fine {fine}, relative difference {rel}");
}

#[test]
fn guest_deeper_than_grid_has_zero_likelihood() {
    let mut nwk = String::from("a0:0.1");
    for i in 1..10 {
        nwk = format!("({nwk},a{i}:0.1):0.1");
    }
    nwk.push(';');
    let host = HostTree::from_newick("(A:1.0,B:1.0):0.5;").expect("failed to parse host tree");
    let guest = GuestTree::from_newick(&nwk).expect("failed to parse guest tree");
    let map = LeafMap::from_pairs((0..10).map(|i| (format!("a{i}"), if i % 2 == 0 { "A" } else { "B" })));
    let mut config = EngineConfig::new(rates(0.1, 0.1, 0.1));
    config.discretisation = DiscretisationConfig::fixed(2);
    let e = ReconciliationEngine::new(host, guest, map, config).expect("failed to build engine");

    let top = e.discretiser().pt_at_top();
    let root = e.guest().tree().root();
    assert_eq!(e.helper().lo(root), top);
    assert_eq!(e.likelihood(), 0.0);
    assert!(dltrs::sampler::max_probability_realisation(&e.context(), e.model()).is_err());
}
