//! Dotted version comparison and upgrade eligibility.

use std::cmp::Ordering;

use itertools::{EitherOrBoth, Itertools};

/// Compare dotted versions segment by segment, numerically where both
/// segments are numbers. Missing trailing segments count as lower.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    for pair in a.split('.').zip_longest(b.split('.')) {
        let ordering = match pair {
            EitherOrBoth::Both(x, y) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            },
            EitherOrBoth::Left(_) => Ordering::Greater,
            EitherOrBoth::Right(_) => Ordering::Less,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub fn latest_version<'a>(versions: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    versions
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
}

pub fn major_segment(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Two versions are a cross-version pair when their major segments differ.
pub fn is_cross_version(a: &str, b: &str) -> bool {
    major_segment(a) != major_segment(b)
}

/// Whether an upgrade to `target` is allowed given the newest known version
/// of the app and its cross-version-update flag.
pub fn upgrade_permitted(target: &str, latest: &str, cross_version_update: bool) -> bool {
    !is_cross_version(target, latest) || cross_version_update
}

/// Whether an install at `installed` has a newer version to move to.
pub fn can_update(installed: &str, latest: &str, cross_version_update: bool) -> bool {
    if is_cross_version(installed, latest) {
        cross_version_update
    } else {
        compare_versions(latest, installed) == Ordering::Greater
    }
}
