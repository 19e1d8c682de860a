use dltrs::DltError;
use dltrs::io::newick::{parse_newick, parse_prime_tags, write_newick};
use dltrs::tree::{GuestTree, HostTree, RootedTree};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

#[test]
fn parses_names_lengths_and_comments() {
    let node = parse_newick(" ((A:0.5, 'B c':0.5[x=1])ab:0.5[&&PRIME y=2][z=3],C:1e0):0.25; ")
        .expect("failed to parse newick");
    assert_eq!(node.n_leaves(), 3);
    assert_eq!(node.length, Some(0.25));
    let ab = &node.children[0];
    assert_eq!(ab.name.as_deref(), Some("ab"));
    assert_eq!(ab.meta.as_deref(), Some("&&PRIME y=2 z=3"));
    assert_eq!(ab.children[1].name.as_deref(), Some("B c"));
    assert_eq!(ab.children[1].meta.as_deref(), Some("x=1"));
    assert_eq!(node.children[1].length, Some(1.0));

    let tags = parse_prime_tags(ab.meta.as_deref().unwrap_or_default());
    assert_eq!(tags.get("y").map(String::as_str), Some("2"));
    assert_eq!(tags.get("z").map(String::as_str), Some("3"));
}

#[test]
fn write_then_parse_keeps_the_tree() {
    let text = "((A:0.5,B:0.5)ab:0.5,C:1):0.25;";
    let node = parse_newick(text).expect("failed to parse newick");
    assert_eq!(write_newick(&node), text);
    assert_eq!(parse_newick(&write_newick(&node)).expect("reparse failed"), node);
}

#[test]
fn names_that_need_quotes_survive_a_rewrite() {
    let text = "(('a x':0.5,'b,c':0.5)'it''s':0.5,'d:e':1):0.25;";
    let node = parse_newick(text).expect("failed to parse newick");
    let names: Vec<_> = node.children[0]
        .children
        .iter()
        .map(|c| c.name.as_deref().expect("leaf has a name"))
        .collect();
    assert_eq!(names, ["a x", "b,c"]);
    assert_eq!(node.children[0].name.as_deref(), Some("it's"));

    let written = write_newick(&node);
    assert_eq!(written, text);
    assert_eq!(parse_newick(&written).expect("reparse failed"), node);

    let plain = parse_newick("(a:1,b:1);").expect("failed to parse newick");
    assert_eq!(write_newick(&plain), "(a:1,b:1);");
}

#[test]
fn syntax_errors_report_a_position() {
    for bad in ["", "((A,B);", "(A,B)C:x;", "(A,B);extra", "(A,[B);", "(,B);"] {
        match parse_newick(bad) {
            Err(DltError::Newick { .. }) => {}
            other => panic!("{bad:?} gave {other:?}"),
        }
    }
}

#[test]
fn rooted_tree_numbering_and_queries() {
    let node = parse_newick("(((a,b)ab,c)abc,d)r;").expect("failed to parse newick");
    let (tree, lengths) = RootedTree::from_newick_node(&node).expect("failed to build tree");
    assert_eq!(tree.n_leaves(), 4);
    assert_eq!(tree.n_vertices(), 7);
    assert!(lengths.iter().all(Option::is_none));

    let names: Vec<&str> = (0..7).map(|u| tree.name(u).unwrap_or("")).collect();
    assert_eq!(names, ["a", "b", "c", "d", "ab", "abc", "r"]);
    assert_eq!(tree.root(), 6);
    assert_eq!(tree.children(4), Some((0, 1)));
    assert_eq!(tree.sibling(2), Some(4));
    assert_eq!(tree.sibling(6), None);
    assert_eq!(tree.vertex_by_name("abc"), Some(5));
    assert_eq!(tree.leaves(), vec![0, 1, 2, 3]);
    assert_eq!(tree.post_order(), vec![0, 1, 4, 2, 5, 3, 6]);
    assert_eq!(tree.pre_order(), vec![6, 5, 4, 0, 1, 2, 3]);
    assert_eq!(tree.depth(0), 3);
    assert_eq!(tree.lca(0, 2), Some(5));
    assert_eq!(tree.lca(1, 3), Some(6));
    assert_eq!(tree.lca(4, 4), Some(4));
    assert_eq!(tree.lca(2, 0), Some(5));
    assert_eq!(tree.lca(0, 7), None);
    assert!(tree.is_ancestor_or_self(5, 1));
    assert!(tree.is_ancestor_or_self(1, 1));
    assert!(!tree.is_ancestor_or_self(1, 5));
    assert_eq!(tree.spanning_root_subtree(&[1, 2]), vec![1, 4, 2, 5, 6]);
}

#[test]
fn non_binary_trees_are_rejected() {
    let node = parse_newick("(a,b,c);").expect("failed to parse newick");
    assert!(matches!(
        RootedTree::from_newick_node(&node),
        Err(DltError::NonBifurcating { n_children: 3, .. })
    ));
}

#[test]
fn host_tree_times_from_branch_lengths() {
    let host = HostTree::from_newick("((A:0.5,B:0.5):0.5,C:1.0):0.5;").expect("failed to parse");
    approx_eq(host.root_time(), 1.0, 1e-12);
    approx_eq(host.stem_time(), 0.5, 1e-12);
    approx_eq(host.top_time(), 1.5, 1e-12);
    approx_eq(host.time(3), 0.5, 1e-12);
    approx_eq(host.arc_time(2), 1.0, 1e-12);
    for l in host.tree().leaves() {
        assert_eq!(host.time(l), 0.0);
    }
    let again = HostTree::from_newick(&host.to_newick()).expect("failed to reparse host");
    assert_eq!(again.times(), host.times());
}

#[test]
fn host_tree_validation() {
    assert_eq!(
        HostTree::from_newick("((A:0.5,B:0.5):0.5,C:1.0);").expect_err("missing stem accepted"),
        DltError::MissingStemTime(None)
    );
    assert!(matches!(
        HostTree::from_newick("((A:0.5,B:0.5):0.5,C:1.0):0.0;"),
        Err(DltError::MissingStemTime(Some(_)))
    ));
    assert!(matches!(
        HostTree::from_newick("((A:0.5,B:0.4):0.5,C:1.0):0.5;"),
        Err(DltError::NotUltrametric { .. })
    ));
    assert!(matches!(
        HostTree::from_newick("((A:1.0,B:1.0):0.0,C:1.0):0.5;"),
        Err(DltError::NonPositiveArc(_))
    ));
}

#[test]
fn guest_tree_lengths() {
    let mut guest = GuestTree::from_newick("((a:0.3,b:0.2):0.1,c);").expect("failed to parse");
    assert_eq!(guest.lengths(), &[0.3, 0.2, 0.0, 0.1, 0.0]);
    guest.set_length(2, 0.4);
    assert_eq!(guest.length(2), 0.4);
    assert_eq!(guest.to_newick(), "((a:0.3,b:0.2):0.1,c:0.4):0;");
}
