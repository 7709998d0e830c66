pub mod full_gc;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    full_gc::bench(c);
}
