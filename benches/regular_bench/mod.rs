pub mod buffer_node;
pub mod card_set;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    buffer_node::bench(c);
    card_set::bench(c);
}
