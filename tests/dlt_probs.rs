use dltrs::DltError;
use dltrs::discretiser::{DiscretisationConfig, EpochDiscretiser, EpochPt};
use dltrs::ode::OdeTolerance;
use dltrs::probs::{DltRates, EpochDltProbs, transfer_factor};
use dltrs::tree::HostTree;

const HOST: &str = "((A:0.5,B:0.5):0.5,C:1.0):0.5;";

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn setup(rates: DltRates, n: usize) -> (EpochDiscretiser, EpochDltProbs) {
    let host = HostTree::from_newick(HOST).expect("failed to parse host tree");
    let disc = EpochDiscretiser::new(&host, DiscretisationConfig::fixed(n))
        .expect("failed to discretise");
    let probs = EpochDltProbs::new(&disc, rates, true, OdeTolerance::default())
        .expect("failed to compute DLT probabilities");
    (disc, probs)
}

fn rates(d: f64, l: f64, t: f64) -> DltRates {
    DltRates::new(d, l, t).expect("invalid rates")
}

#[test]
fn negative_or_nan_rates_are_rejected() {
    assert_eq!(
        DltRates::new(-0.1, 0.1, 0.1),
        Err(DltError::InvalidRate {
            name: "duplication",
            value: -0.1
        })
    );
    assert!(DltRates::new(0.1, f64::NAN, 0.1).is_err());
    assert!(DltRates::new(0.1, 0.1, f64::INFINITY).is_err());
}

#[test]
fn extinction_is_zero_at_leaves() {
    let (disc, probs) = setup(rates(0.3, 0.2, 0.1), 3);
    for e in 0..disc.n_arcs(0) {
        assert_eq!(probs.qe(EpochPt::LEAF, e), 0.0);
    }
}

#[test]
fn one_to_one_is_identity_at_equal_points() {
    let (disc, probs) = setup(rates(0.3, 0.2, 0.1), 3);
    for (i, ep) in disc.epochs().iter().enumerate() {
        for t in 0..ep.n_times() {
            let pt = EpochPt::new(i, t);
            for e in 0..ep.n_arcs() {
                for f in 0..ep.n_arcs() {
                    let want = if e == f { 1.0 } else { 0.0 };
                    assert_eq!(probs.qef(pt, f, pt, e), want, "point {pt}, arcs ({f}, {e})");
                }
            }
        }
    }
}

#[test]
fn all_probabilities_lie_in_unit_interval() {
    let (_, probs) = setup(rates(1.5, 0.7, 0.9), 4);
    for v in probs.extinction().values() {
        assert!((0.0..=1.0).contains(&v), "Qe out of range: {v}");
    }
    for v in probs.one_to_one().values() {
        assert!((0.0..=1.0).contains(&v), "Qef out of range: {v}");
    }
}

#[test]
fn zero_rates_keep_lineages_on_their_arc() {
    let (disc, probs) = setup(rates(0.0, 0.0, 0.0), 2);
    assert!(probs.extinction().values().all(|v| v == 0.0));

    // C runs straight from the leaves to the root split.
    let c_leaf = disc.epoch(0).arc_index(2).expect("C in leaf epoch");
    let c_mid = disc.epoch(1).arc_index(2).expect("C in middle epoch");
    assert_eq!(probs.qef(EpochPt::new(0, 1), c_leaf, EpochPt::new(1, 2), c_mid), 1.0);

    // Nothing survives alone across a speciation without losses.
    assert_eq!(probs.qef(EpochPt::new(0, 1), 0, EpochPt::new(1, 2), 0), 0.0);
    assert_eq!(probs.qef(EpochPt::new(0, 1), 0, EpochPt::new(0, 2), 1), 0.0);
}

#[test]
fn pure_loss_matches_exponential_decay_in_leaf_epoch() {
    let mu = 0.4;
    let (disc, probs) = setup(rates(0.0, mu, 0.0), 3);
    let top = EpochPt::new(0, disc.epoch(0).last_index());
    let t = disc.time(top);
    for e in 0..disc.n_arcs(0) {
        approx_eq(probs.qe(top, e), 1.0 - (-mu * t).exp(), 1e-5);
        approx_eq(probs.qef(EpochPt::LEAF, e, top, e), (-mu * t).exp(), 1e-5);
    }
}

#[test]
fn stem_extinction_rises_towards_top() {
    let (disc, probs) = setup(rates(0.2, 0.5, 0.1), 4);
    let top = disc.n_epochs() - 1;
    let ep = disc.epoch(top);
    for t in 1..ep.n_times() {
        let below = probs.qe(EpochPt::new(top, t - 1), 0);
        let here = probs.qe(EpochPt::new(top, t), 0);
        assert!(here >= below, "Qe decreased along the stem: {below} -> {here}");
    }
}

#[test]
fn transfer_factor_normalisation() {
    approx_eq(transfer_factor(0.6, 4, true), 0.2, 1e-15);
    approx_eq(transfer_factor(0.6, 4, false), 0.6, 1e-15);
    approx_eq(transfer_factor(0.6, 1, true), 0.6, 1e-15);
    let (_, probs) = setup(rates(0.1, 0.1, 0.6), 2);
    approx_eq(probs.transfer_factor(3), 0.3, 1e-15);
}

#[test]
fn restore_cache_gives_back_exact_maps() {
    let (disc, mut probs) = setup(rates(0.3, 0.2, 0.1), 3);
    let qe = probs.extinction().clone();
    let qef = probs.one_to_one().clone();

    probs.cache();
    probs.set_rates(rates(0.9, 0.1, 0.4)).expect("invalid rates");
    probs.update(&disc);
    assert_ne!(probs.extinction(), &qe);

    probs.restore_cache();
    assert_eq!(probs.extinction(), &qe);
    assert_eq!(probs.one_to_one(), &qef);
    assert_eq!(probs.rates(), rates(0.3, 0.2, 0.1));
}

#[test]
fn recompute_with_same_rates_is_bitwise_stable() {
    let (disc, mut probs) = setup(rates(0.3, 0.2, 0.1), 3);
    let before: Vec<u64> = probs.one_to_one().values().map(f64::to_bits).collect();
    probs.update(&disc);
    let after: Vec<u64> = probs.one_to_one().values().map(f64::to_bits).collect();
    assert_eq!(before, after);
}
