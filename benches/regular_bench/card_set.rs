//! Benchmarks for adding cards to remembered sets, sparse and dense.

use criterion::Criterion;
use mmtk_g1::policy::g1::card_set::CardSet;
use mmtk_g1::util::options::Options;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;
use std::sync::Arc;

const NUM_CARDS: usize = 4096;

fn cards(range: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    (0..NUM_CARDS).map(|_| rng.random_range(0..range)).collect()
}

fn bench_add(c: &mut Criterion, name: &str, cards: Vec<usize>) {
    let config = Arc::new(CardSet::configuration(&Options::default()));
    c.bench_function(name, |b| {
        let set = CardSet::new(config.clone());
        b.iter(|| {
            for &card in cards.iter() {
                black_box(set.add_card(card));
            }
            set.clear();
        });
    });
}

pub fn bench(c: &mut Criterion) {
    // Spread over many regions, so most containers stay arrays.
    bench_add(c, "card_set_add_sparse", cards(1 << 24));
    // Few regions, so containers turn into bitmaps.
    bench_add(c, "card_set_add_dense", cards(1 << 13));
}
