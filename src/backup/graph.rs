//! Location dependency graph.
//!
//! Each location becomes a node whose edges point at the locations it
//! `depends_on`; the sorter is run with reversed edges so dependencies come
//! first.

use crate::backup::location::Location;
use crate::backup::result_error::result::Result;
use crate::backup::topo::{topological_sort, AdjacencyList};
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Resolves a location name to its record.
pub trait LocationLookup {
    fn lookup_location(&self, name: &str) -> Option<&Location>;
}

impl<L: Borrow<Location>> LocationLookup for BTreeMap<String, L> {
    fn lookup_location(&self, name: &str) -> Option<&Location> {
        self.get(name).map(Borrow::borrow)
    }
}

/// One entry per location, isolated ones included. Dependencies outside the
/// given set are dropped unless `include_outside_set` is set.
pub fn adjacency_from_map<L: Borrow<Location>>(
    locations: &BTreeMap<String, L>,
    include_outside_set: bool,
) -> AdjacencyList<String> {
    locations
        .iter()
        .map(|(name, location)| {
            let deps = location
                .borrow()
                .depends_on()
                .iter()
                .filter(|dep| include_outside_set || locations.contains_key(dep.as_str()))
                .cloned()
                .collect();
            (name.clone(), deps)
        })
        .collect()
}

/// Like [`adjacency_from_map`] for a list of names. Names the lookup does not
/// know are ignored.
pub fn adjacency_from_names<S: AsRef<str>, L: LocationLookup + ?Sized>(
    names: &[S],
    lookup: &L,
    include_outside_set: bool,
) -> AdjacencyList<String> {
    let locations: BTreeMap<String, &Location> = names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            lookup
                .lookup_location(name)
                .map(|location| (name.to_string(), location))
        })
        .collect();
    adjacency_from_map(&locations, include_outside_set)
}

pub fn sort_locations_from_map<L: Borrow<Location>>(locations: &BTreeMap<String, L>) -> Result<Vec<String>> {
    topological_sort(&adjacency_from_map(locations, false), true)
}

pub fn sort_locations_from_names<S: AsRef<str>, L: LocationLookup + ?Sized>(
    names: &[S],
    lookup: &L,
) -> Result<Vec<String>> {
    topological_sort(&adjacency_from_names(names, lookup, false), true)
}
