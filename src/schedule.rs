use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Display string returned for a class with no schedule set.
pub const SCHEDULE_PLACEHOLDER: &str = "Horario no definido";

/// One segment of a raw schedule string: `"Lunes 8:00-9:30"`.
/// `start`/`end` keep the matched time tokens verbatim; the raw string in
/// the database stays the source of truth and entries are recomputed from
/// it on every use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub day: String,
    pub start: String,
    pub end: String,
}

impl ScheduleEntry {
    /// Weekday index of this entry, 0 = Sunday .. 6 = Saturday.
    pub fn weekday(&self) -> Option<u32> {
        weekday_index_of(&self.day)
    }
}

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\p{L}+)\s+(\d{1,2}:\d{2})-(\d{1,2}:\d{2})$").unwrap());

fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str().to_lowercase().as_str(),
        None => String::new(),
    }
}

/// Weekday index for a Spanish day name, 0 = Sunday .. 6 = Saturday.
/// Accent-insensitive: "Miércoles" and "miercoles" both resolve to 3.
pub fn weekday_index_of(day: &str) -> Option<u32> {
    match fold_diacritics(&day.to_lowercase()).as_str() {
        "domingo" => Some(0),
        "lunes" => Some(1),
        "martes" => Some(2),
        "miercoles" => Some(3),
        "jueves" => Some(4),
        "viernes" => Some(5),
        "sabado" => Some(6),
        _ => None,
    }
}

/// Parse a raw schedule string into entries. Segments that do not match
/// `"<Day> <H:MM>-<H:MM>"` or whose day name is not a Spanish weekday are
/// dropped without error; empty input yields an empty list.
pub fn parse_schedule(raw: Option<&str>) -> Vec<ScheduleEntry> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if raw.trim().is_empty() {
        return Vec::new();
    }

    raw.split(',')
        .filter_map(|segment| {
            let caps = SEGMENT_RE.captures(segment.trim())?;
            let day_token = caps.get(1)?.as_str();
            weekday_index_of(day_token)?;
            Some(ScheduleEntry {
                day: capitalize(day_token),
                start: caps.get(2)?.as_str().to_string(),
                end: caps.get(3)?.as_str().to_string(),
            })
        })
        .collect()
}

/// True iff the schedule has at least one entry on the given weekday
/// (0 = Sunday .. 6 = Saturday).
pub fn occurs_on_weekday(raw: Option<&str>, weekday: u32) -> bool {
    parse_schedule(raw)
        .iter()
        .any(|e| e.weekday() == Some(weekday))
}

/// Local-clock convenience wrapper around `occurs_on_weekday`. The result
/// is intentionally time-dependent: schedule display reflects "right now".
pub fn occurs_today(raw: Option<&str>) -> bool {
    use chrono::Datelike;
    occurs_on_weekday(raw, chrono::Local::now().weekday().num_days_from_sunday())
}

/// Canonical display string for a raw schedule. Empty input yields the
/// placeholder; a raw string that parses to zero entries is returned
/// unchanged so the user still sees what they typed.
pub fn format_for_display(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return SCHEDULE_PLACEHOLDER.to_string();
    };
    if raw.trim().is_empty() {
        return SCHEDULE_PLACEHOLDER.to_string();
    }

    let entries = parse_schedule(Some(raw));
    if entries.is_empty() {
        return raw.to_string();
    }
    entries
        .iter()
        .map(|e| format!("{} {}-{}", e.day, e.start, e.end))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_segments() {
        let entries = parse_schedule(Some("Lunes 8:00-9:30, Miércoles 8:00-9:40"));
        assert_eq!(
            entries,
            vec![
                ScheduleEntry {
                    day: "Lunes".to_string(),
                    start: "8:00".to_string(),
                    end: "9:30".to_string(),
                },
                ScheduleEntry {
                    day: "Miércoles".to_string(),
                    start: "8:00".to_string(),
                    end: "9:40".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_and_missing_input_yield_no_entries() {
        assert!(parse_schedule(None).is_empty());
        assert!(parse_schedule(Some("")).is_empty());
        assert!(parse_schedule(Some("   ")).is_empty());
    }

    #[test]
    fn malformed_segments_are_dropped_not_fatal() {
        let entries = parse_schedule(Some("Lunes 8:00-9:30, cualquier cosa, Jueves 10:00-11:00"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].day, "Lunes");
        assert_eq!(entries[1].day, "Jueves");
    }

    #[test]
    fn segment_with_trailing_garbage_is_rejected() {
        assert!(parse_schedule(Some("Lunes 8:00-9:30 aula 4")).is_empty());
        assert!(parse_schedule(Some("ver Lunes 8:00-9:30")).is_empty());
    }

    #[test]
    fn unknown_day_name_is_dropped() {
        assert!(parse_schedule(Some("Monday 8:00-9:30")).is_empty());
    }

    #[test]
    fn minutes_must_be_two_digits() {
        assert!(parse_schedule(Some("Lunes 8:0-9:30")).is_empty());
        assert!(parse_schedule(Some("Lunes 8:000-9:30")).is_empty());
    }

    #[test]
    fn accent_insensitive_day_resolution() {
        let plain = parse_schedule(Some("Miercoles 8:00-9:30"));
        let accented = parse_schedule(Some("Miércoles 8:00-9:30"));
        assert_eq!(plain.len(), 1);
        assert_eq!(accented.len(), 1);
        assert_eq!(plain[0].weekday(), Some(3));
        assert_eq!(accented[0].weekday(), Some(3));
    }

    #[test]
    fn day_label_casing_is_canonicalized() {
        let entries = parse_schedule(Some("LUNES 8:00-9:30, viernes 14:15-15:00"));
        assert_eq!(entries[0].day, "Lunes");
        assert_eq!(entries[1].day, "Viernes");
    }

    #[test]
    fn weekday_index_table() {
        assert_eq!(weekday_index_of("Domingo"), Some(0));
        assert_eq!(weekday_index_of("lunes"), Some(1));
        assert_eq!(weekday_index_of("MARTES"), Some(2));
        assert_eq!(weekday_index_of("miércoles"), Some(3));
        assert_eq!(weekday_index_of("Jueves"), Some(4));
        assert_eq!(weekday_index_of("viernes"), Some(5));
        assert_eq!(weekday_index_of("Sábado"), Some(6));
        assert_eq!(weekday_index_of("sabado"), Some(6));
        assert_eq!(weekday_index_of("feriado"), None);
        assert_eq!(weekday_index_of(""), None);
    }

    #[test]
    fn occurs_on_weekday_membership() {
        let raw = Some("Lunes 8:00-9:30, Jueves 10:00-11:00");
        assert!(occurs_on_weekday(raw, 1));
        assert!(!occurs_on_weekday(raw, 2));
        assert!(occurs_on_weekday(raw, 4));
        assert!(!occurs_on_weekday(None, 1));
        assert!(!occurs_on_weekday(Some(""), 1));
    }

    #[test]
    fn display_round_trips_well_formed_input() {
        let raw = "Lunes 8:00-9:30, Miércoles 8:00-9:40";
        assert_eq!(format_for_display(Some(raw)), raw);
    }

    #[test]
    fn display_canonicalizes_casing_but_not_times() {
        // "8:00" stays "8:00" rather than being padded to "08:00".
        assert_eq!(
            format_for_display(Some("lunes 8:05-9:30,MIÉRCOLES 10:00-11:15")),
            "Lunes 8:05-9:30, Miércoles 10:00-11:15"
        );
    }

    #[test]
    fn display_passes_unparseable_input_through() {
        assert_eq!(format_for_display(Some("garbage text")), "garbage text");
    }

    #[test]
    fn display_placeholder_for_missing_schedule() {
        assert_eq!(format_for_display(None), SCHEDULE_PLACEHOLDER);
        assert_eq!(format_for_display(Some("  ")), SCHEDULE_PLACEHOLDER);
    }

    #[test]
    fn inverted_time_range_passes_through_uninterpreted() {
        // start < end is not the parser's business to enforce.
        let entries = parse_schedule(Some("Lunes 9:30-8:00"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, "9:30");
        assert_eq!(entries[0].end, "8:00");
    }
}
