use crate::domains::*;

#[derive(Debug, Clone, PartialEq)]
enum Escape {
    NoEscape,
    ViaParameter,
    ViaReturn,
    GlobalEscape,
}

use Escape::*;

fn escape_lattice() -> std::sync::Arc<FiniteLattice<Escape>> {
    FiniteLattice::new(
        &[GlobalEscape, ViaParameter, ViaReturn, NoEscape],
        &[
            (NoEscape, ViaParameter),
            (NoEscape, ViaReturn),
            (ViaParameter, GlobalEscape),
            (ViaReturn, GlobalEscape),
        ],
    )
    .unwrap()
}

#[test]
fn bool_domain_test() {
    let bottom = bool::bottom(&());
    let top = bool::top(&());

    assert!(top > bottom);
    assert_eq!(top.join_(&bottom), top);
    assert_eq!(top.meet_(&bottom), bottom);
    assert_eq!(top.join_(&top), top);
    assert_eq!(bottom.meet_(&bottom), bottom);
    assert_eq!(bool::bottom_(), false);
    assert_eq!(bool::top_(), true);
}

#[test]
fn unit_domain_test() {
    assert_eq!(<()>::bottom_(), <()>::top_());
    assert_eq!(().join_(&()), ());
}

#[test]
fn finite_domain_order() {
    let lattice = escape_lattice();
    let no = lattice.element(&NoEscape).unwrap();
    let param = lattice.element(&ViaParameter).unwrap();
    let ret = lattice.element(&ViaReturn).unwrap();
    let global = lattice.element(&GlobalEscape).unwrap();

    assert!(no < param);
    assert!(no < ret);
    assert!(param < global);
    assert!(no < global);
    assert_eq!(param.partial_cmp(&ret), None);
    assert!(!(param <= ret));
    assert!(!(ret <= param));
    assert!(is_at_least_as_precise(&no, &global));
    assert!(!is_at_least_as_precise(&param, &ret));

    assert_eq!(lattice.top_element(), global);
    assert_eq!(lattice.bottom_element(), no);
    assert_eq!(format!("{param:?}"), "ViaParameter");
    assert_eq!(param.value(), &ViaParameter);
}

#[test]
fn finite_domain_operations() {
    let lattice = escape_lattice();
    let no = lattice.element(&NoEscape).unwrap();
    let param = lattice.element(&ViaParameter).unwrap();
    let ret = lattice.element(&ViaReturn).unwrap();
    let global = lattice.element(&GlobalEscape).unwrap();

    assert_eq!(param.join(&ret, &lattice), global);
    assert_eq!(param.meet(&ret, &lattice), no);
    assert_eq!(no.join(&param, &lattice), param);
    assert_eq!(global.meet(&ret, &lattice), ret);
    assert_eq!(FiniteElement::bottom(&lattice), no);
    assert_eq!(FiniteElement::top(&lattice), global);
    assert_eq!(join_all([&param, &no, &ret], &lattice), global);
    assert_eq!(join_all::<FiniteElement<Escape>, _>([], &lattice), no);
}

#[test]
fn finite_domains_do_not_mix() {
    let first = escape_lattice();
    let second = escape_lattice();
    let a = first.element(&NoEscape).unwrap();
    let b = second.element(&NoEscape).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.partial_cmp(&b), None);
}

#[test]
fn finite_domain_errors() {
    assert_eq!(
        FiniteLattice::new(&[NoEscape], &[]).unwrap_err(),
        FiniteLatticeError::LatticeTooSmall
    );
    assert_eq!(
        FiniteLattice::new(&[NoEscape, NoEscape], &[]).unwrap_err(),
        FiniteLatticeError::HasDuplicateElements
    );
    assert_eq!(
        FiniteLattice::new(&[NoEscape, ViaReturn], &[(NoEscape, GlobalEscape)]).unwrap_err(),
        FiniteLatticeError::NonExistentEdge
    );
    // Two maximal elements, no top.
    assert_eq!(
        FiniteLattice::new(
            &[NoEscape, ViaParameter, ViaReturn],
            &[(NoEscape, ViaParameter), (NoEscape, ViaReturn)]
        )
        .unwrap_err(),
        FiniteLatticeError::NoLeastUpperBound(1, 2)
    );
    assert_eq!(
        FiniteLattice::new(
            &[NoEscape, GlobalEscape],
            &[(NoEscape, GlobalEscape), (GlobalEscape, NoEscape)]
        )
        .unwrap_err(),
        FiniteLatticeError::NotAntisymmetric(0, 1)
    );
}
