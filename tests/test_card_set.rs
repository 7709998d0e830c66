use mmtk_g1::policy::g1::card_set::CardSet;
use mmtk_g1::util::options::Options;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;

fn card_set() -> CardSet {
    CardSet::new(Arc::new(CardSet::configuration(&Options::default())))
}

#[test]
fn random_cards_round_trip() {
    let set = card_set();
    let mut expected = BTreeSet::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..5000 {
        let card = rng.random_range(0..1 << 20);
        assert_eq!(set.add_card(card), expected.insert(card));
    }
    assert_eq!(set.occupied(), expected.len());
    let mut cards = vec![];
    set.iterate_cards(|c| cards.push(c));
    cards.sort_unstable();
    assert_eq!(cards, expected.iter().copied().collect::<Vec<_>>());
    assert!(expected.iter().all(|&c| set.contains_card(c)));

    set.clear();
    assert!(set.is_empty());
    assert_eq!(set.num_containers(), 0);
}

#[test]
fn concurrent_adds() {
    let set = card_set();
    crossbeam::thread::scope(|s| {
        for t in 0..4usize {
            let set = &set;
            s.spawn(move |_| {
                // Every thread adds the same cards, and some of its own.
                for card in 0..2000 {
                    set.add_card(card * 3);
                }
                for card in 0..500 {
                    set.add_card(1_000_000 + t * 500 + card);
                }
            });
        }
    })
    .unwrap();
    assert_eq!(set.occupied(), 2000 + 4 * 500);
}
