//! Built-in extraction methods.
//!
//! Each submodule holds one family of methods together with its parameter
//! struct. Every method reads its inputs from the working record through
//! [`StepContext`](crate::harvest::StepContext), so the same method can run
//! at item or asset scope.
//!
//! | Name                          | Writes                                   |
//! |-------------------------------|------------------------------------------|
//! | `default` / `set_default`     | fixed values or `$key` references        |
//! | `regex` / `regex_extract`     | capture groups of a pattern              |
//! | `basename`                    | file name of a path                      |
//! | `path_parts`                  | file name and directory levels           |
//! | `hash`                        | md5 hex digest of joined terms           |
//! | `string_join`                 | terms joined with a delimiter            |
//! | `point_geometry`              | GeoJSON point from two coordinate keys   |
//! | `bbox`                        | `[min_x, min_y, max_x, max_y]`           |
//! | `iso_date`                    | dates normalized to ISO 8601             |
//! | `datetime_centroid`           | midpoint of a start/end interval         |
//! | `file_stats`                  | size, modified time, extension           |

use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::registry::MethodFactory;
use crate::harvest::traits::ExtractionMethod;

pub mod datetime;
pub mod defaults;
pub mod geometry;
pub mod hash;
pub mod path;
pub mod pattern;
pub mod stats;
pub mod strings;

type Build = fn(&MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError>;

fn factory(build: Build) -> MethodFactory {
    Arc::new(build)
}

pub(crate) fn builtin_factories() -> Vec<(&'static str, MethodFactory)> {
    let default = factory(defaults::DefaultExtract::build);
    let regex = factory(pattern::RegexExtract::build);

    vec![
        ("default", default.clone()),
        ("set_default", default),
        ("regex", regex.clone()),
        ("regex_extract", regex),
        ("basename", factory(path::BasenameExtract::build)),
        ("path_parts", factory(path::PathPartsExtract::build)),
        ("hash", factory(hash::HashExtract::build)),
        ("string_join", factory(strings::StringJoinExtract::build)),
        ("point_geometry", factory(geometry::PointGeometryExtract::build)),
        ("bbox", factory(geometry::BboxExtract::build)),
        ("iso_date", factory(datetime::IsoDateExtract::build)),
        (
            "datetime_centroid",
            factory(datetime::DatetimeCentroidExtract::build),
        ),
        ("file_stats", factory(stats::FileStatsExtract::build)),
    ]
}
