use crate::util::constants::*;
use std::default::Default;

/// The default number of bytes of used heap each adaptive full-GC worker is expected to cover.
pub const DEFAULT_HEAP_SIZE_PER_GC_THREAD: usize = 64 << LOG_BYTES_IN_MBYTE;
/// The default number of pending released nodes before a free-list allocator tries to move
/// them to its free list.
pub const DEFAULT_TRANSFER_THRESHOLD: usize = 10;
/// The default smallest number of slots in a card set arena segment.
pub const DEFAULT_CARD_SET_INITIAL_SLOTS: usize = 8;
/// The default largest number of slots in a card set arena segment.
pub const DEFAULT_CARD_SET_MAX_SLOTS: usize = (u32::MAX / 2) as usize;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_valid_region_size(v: &usize) -> bool {
    v.is_power_of_two() && *v >= MIN_REGION_BYTES && *v <= MAX_REGION_BYTES
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Collector options. Every option can be overridden by an environment variable named
        /// after the option with the `MMTK_` prefix, e.g. `MMTK_HEAP_WASTE_PERCENT=10`.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake-case name and a string value. Returns `false`
            /// (and keeps the current value) if the value cannot be parsed or is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options {
                    $($name: $default),*
                };

                // If we have env vars that start with MMTK_ and match any option (such as MMTK_REGION_SIZE),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "MMTK_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Maximum number of GC worker threads.
    threads:                      usize [|v: &usize| *v > 0]  = num_cpus::get(),
    // Size the full GC worker gang from heap waste, heap usage and used regions. Otherwise always use `threads`.
    use_dynamic_gc_threads:       bool  [always_valid]        = true,
    // Bytes of used heap per adaptive GC worker.
    heap_size_per_gc_thread:      usize [|v: &usize| *v > 0]  = DEFAULT_HEAP_SIZE_PER_GC_THREAD,
    // Bytes in a heap region. Must be a power of two between 64 KiB and 32 MiB.
    region_size:                  usize [is_valid_region_size] = DEFAULT_REGION_BYTES,
    // Percentage of the heap we are willing to waste. Each full GC worker wastes on average half a region.
    heap_waste_percent:           usize [is_percentage]       = 5,
    // Percentage of dead space tolerated in a region before the full GC compacts it.
    mark_sweep_dead_ratio:        usize [is_percentage]       = 5,
    // Number of collections a pinned candidate region is kept before it is dropped from the candidates.
    num_collections_keep_pinned:  usize [always_valid]        = 8,
    // The number of mixed collections the marking candidates should be spread over.
    mixed_gc_count_target:        usize [|v: &usize| *v > 0]  = 8,
    // Number of released nodes pending in a free-list allocator before a transfer is attempted.
    free_list_transfer_threshold: usize [always_valid]        = DEFAULT_TRANSFER_THRESHOLD,
    // The smallest number of slots in a card set arena segment.
    card_set_initial_slots:       usize [|v: &usize| *v > 0]  = DEFAULT_CARD_SET_INITIAL_SLOTS,
    // The largest number of slots in a card set arena segment.
    card_set_max_slots:           usize [|v: &usize| *v > 0]  = DEFAULT_CARD_SET_MAX_SLOTS,
    // Walk every region after a full GC and check it is well-formed.
    verify_full_gc:               bool  [always_valid]        = false,
}

impl Options {
    /// The number of words in a region.
    pub fn region_words(&self) -> usize {
        self.region_size >> LOG_BYTES_IN_WORD
    }

    /// Regions with more live words than this are not compacted by a full GC.
    pub fn region_compaction_threshold(&self) -> usize {
        self.region_words() * (100 - self.mark_sweep_dead_ratio) / 100
    }
}
