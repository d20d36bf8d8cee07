mod util;
use util::*;

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use sieve_amge::algs::communicator::{Communicator, NoComm};
use sieve_amge::amge::{compute_diag_elements, count_claims, verify_partition_of_unity};
use sieve_amge::linalg::IndexPartition;

const N_FINE: u64 = 24;

fn maps_strategy() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::btree_set(0..N_FINE, 1..6), 1..16)
        .prop_map(|rows| rows.into_iter().map(|s: BTreeSet<u64>| s.into_iter().collect()).collect())
}

fn multiplicities(maps: &[Vec<u64>]) -> HashMap<u64, usize> {
    let mut counts = HashMap::new();
    for &index in maps.iter().flatten() {
        *counts.entry(index).or_insert(0) += 1;
    }
    counts
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn serial_weights_are_reciprocal_multiplicities(maps in maps_strategy()) {
        let partition = IndexPartition::from_sizes(&[N_FINE]);
        let diag = compute_diag_elements(&maps, &partition, &NoComm).unwrap();
        let counts = multiplicities(&maps);
        for (map, weights) in maps.iter().zip(&diag) {
            prop_assert_eq!(map.len(), weights.len());
            for (index, w) in map.iter().zip(weights) {
                prop_assert_eq!(*w, 1.0 / counts[index] as f64);
            }
        }
        prop_assert!(verify_partition_of_unity(&maps, &diag, &partition, &NoComm).is_ok());
        prop_assert_eq!(count_claims(&maps).unwrap().len(), counts.len());
    }

    #[test]
    fn two_rank_weights_match_the_global_count(maps in maps_strategy()) {
        let counts = multiplicities(&maps);
        let shared = maps.clone();
        let per_rank = on_ranks(2, move |comm| {
            // rows alternate between the ranks
            let mine: Vec<Vec<u64>> = shared
                .iter()
                .enumerate()
                .filter(|(row, _)| row % comm.size() == comm.rank())
                .map(|(_, map)| map.clone())
                .collect();
            let partition = IndexPartition::from_sizes(&[N_FINE / 2, N_FINE - N_FINE / 2]);
            let diag = compute_diag_elements(&mine, &partition, &comm).unwrap();
            let verified = verify_partition_of_unity(&mine, &diag, &partition, &comm).is_ok();
            (mine, diag, verified)
        });
        for (mine, diag, verified) in per_rank {
            prop_assert!(verified);
            for (map, weights) in mine.iter().zip(&diag) {
                for (index, w) in map.iter().zip(weights) {
                    prop_assert_eq!(*w, 1.0 / counts[index] as f64);
                }
            }
        }
    }

    #[test]
    fn a_repeated_index_is_rejected(mut map in prop::collection::vec(0..N_FINE, 1..6)) {
        map.push(map[0]);
        let partition = IndexPartition::from_sizes(&[N_FINE]);
        prop_assert!(compute_diag_elements(&[map], &partition, &NoComm).is_err());
    }
}
