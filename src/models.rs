use crate::config::ENTITY_FILE_EXTENSION;
use csv::StringRecord;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The GTFS entity files that get consolidated. Anything else in the feed is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Agency,
    Calendar,
    CalendarDates,
    Routes,
    Stops,
    StopTimes,
    Trips,
    Shapes,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Agency,
        EntityType::Calendar,
        EntityType::CalendarDates,
        EntityType::Routes,
        EntityType::Stops,
        EntityType::StopTimes,
        EntityType::Trips,
        EntityType::Shapes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Agency => "agency",
            EntityType::Calendar => "calendar",
            EntityType::CalendarDates => "calendar_dates",
            EntityType::Routes => "routes",
            EntityType::Stops => "stops",
            EntityType::StopTimes => "stop_times",
            EntityType::Trips => "trips",
            EntityType::Shapes => "shapes",
        }
    }

    /// File name used both for matching feed files and for the consolidated output.
    pub fn file_name(self) -> String {
        format!("{}.{}", self.name(), ENTITY_FILE_EXTENSION)
    }

    /// Fixed column order written as the first row of every output table.
    pub fn header(self) -> &'static [&'static str] {
        match self {
            EntityType::Agency => &[
                "agency_id",
                "agency_name",
                "agency_url",
                "agency_timezone",
                "agency_lang",
            ],
            EntityType::Calendar => &[
                "service_id",
                "monday",
                "tuesday",
                "wednesday",
                "thursday",
                "friday",
                "saturday",
                "sunday",
                "start_date",
                "end_date",
            ],
            EntityType::CalendarDates => &["service_id", "date", "exception_type"],
            EntityType::Routes => &[
                "route_id",
                "agency_id",
                "route_short_name",
                "route_long_name",
                "route_type",
                "route_color",
                "route_text_color",
            ],
            EntityType::Stops => &["stop_id", "stop_name", "stop_lat", "stop_lon"],
            EntityType::StopTimes => &[
                "trip_id",
                "arrival_time",
                "departure_time",
                "stop_id",
                "stop_sequence",
                "stop_headsign",
                "pickup_type",
                "drop_off_type",
                "shape_dist_traveled",
            ],
            EntityType::Trips => &[
                "route_id",
                "service_id",
                "trip_id",
                "shape_id",
                "trip_headsign",
                "direction_id",
            ],
            EntityType::Shapes => &[
                "shape_id",
                "shape_pt_lat",
                "shape_pt_lon",
                "shape_pt_sequence",
                "shape_dist_traveled",
            ],
        }
    }

    /// Column indices (into [`header`](Self::header)) forming the natural key.
    ///
    /// Single-id entities key on their first column. Child rows whose first column
    /// is a parent id (stop times, calendar exceptions, shape points) key on the
    /// parent id plus the ordering column, and trips key on `trip_id`.
    ///
    /// Keying every type on column 0 alone would collapse all stop times of a
    /// trip, all exceptions of a service and all points of a shape into one row,
    /// and would keep only one trip per route. Those four types therefore do not
    /// use the first field as their key; two trips on the same route both survive.
    pub fn key_columns(self) -> &'static [usize] {
        match self {
            EntityType::Agency
            | EntityType::Calendar
            | EntityType::Routes
            | EntityType::Stops => &[0],
            EntityType::CalendarDates => &[0, 1],
            EntityType::StopTimes => &[0, 4],
            EntityType::Trips => &[2],
            EntityType::Shapes => &[0, 3],
        }
    }

    /// Resolve an entity type from an exact file base name such as `stops.txt`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if ext != ENTITY_FILE_EXTENSION {
            return None;
        }
        Self::ALL.into_iter().find(|t| t.name() == stem)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::from_file_name)
    }

    pub fn header_record(self) -> StringRecord {
        StringRecord::from(self.header().to_vec())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One data row read from a feed file, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct Record {
    pub source: Arc<Path>,
    pub entity: EntityType,
    pub fields: StringRecord,
}

impl Record {
    pub fn new(source: Arc<Path>, entity: EntityType, fields: StringRecord) -> Self {
        Self {
            source,
            entity,
            fields,
        }
    }

    /// Natural key of this row. Missing key columns count as empty strings.
    pub fn key(&self) -> String {
        let columns = self.entity.key_columns();
        if let [single] = columns {
            return self.fields.get(*single).unwrap_or_default().to_string();
        }

        let mut key = String::new();
        for (i, &col) in columns.iter().enumerate() {
            if i > 0 {
                key.push('\u{1f}');
            }
            key.push_str(self.fields.get(col).unwrap_or_default());
        }
        key
    }
}
