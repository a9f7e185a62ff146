use std::path::Path;

use serde::Serialize;

use crate::{
    process::{EnrichedSchool, Status},
    Error, Result,
};

const HEADER: [&str; 9] = [
    "school_id",
    "name",
    "municipality",
    "merit_value",
    "address",
    "latitude",
    "longitude",
    "rank",
    "status",
];

/// One line of the output table, fields in `HEADER` order. Unresolved schools keep empty coordinate fields.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    school_id: &'a str,
    name: &'a str,
    municipality: &'a str,
    merit_value: f64,
    address: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    rank: usize,
    status: Status,
}

impl<'a> From<&'a EnrichedSchool> for ReportRow<'a> {
    fn from(school: &'a EnrichedSchool) -> Self {
        ReportRow {
            school_id: &school.record.id,
            name: &school.record.name,
            municipality: &school.record.municipality,
            merit_value: school.record.merit,
            address: school.address.as_deref(),
            latitude: school.coordinate.map(|c| c.lat),
            longitude: school.coordinate.map(|c| c.lng),
            rank: school.standing.rank,
            status: school.status,
        }
    }
}

/// Serializes every school, mapped or not, one row each. The header is
/// written even when there are no schools.
pub fn report_csv(schools: &[EnrichedSchool]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for school in schools {
        writer.serialize(ReportRow::from(school))?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

pub async fn write_report(path: &Path, schools: &[EnrichedSchool]) -> Result<()> {
    let bytes = report_csv(schools)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        load::{Owner, SchoolRecord},
        process::enrich,
        store::Coordinate,
    };

    fn record(id: &str, merit: f64) -> SchoolRecord {
        SchoolRecord {
            id: id.into(),
            name: format!("Skola {id}"),
            municipality: "Solna".into(),
            merit,
            pass_rate: None,
            students: None,
            owner: Owner::Municipal,
        }
    }

    #[test]
    fn unresolved_rows_have_empty_coordinates() {
        let (schools, _) = enrich(vec![
            (
                record("S1", 300.0),
                Some("Main St 1".into()),
                Some(Coordinate { lat: 59.3, lng: 18.0 }),
            ),
            (record("S2", 200.0), Some("Side St 2".into()), None),
            (record("S3", 250.0), None, None),
        ]);
        let csv = String::from_utf8(report_csv(&schools).unwrap()).unwrap();
        let lines = csv.lines().collect::<Vec<_>>();

        assert_eq!(
            lines[0],
            "school_id,name,municipality,merit_value,address,latitude,longitude,rank,status"
        );
        assert_eq!(lines[1], "S1,Skola S1,Solna,300.0,Main St 1,59.3,18.0,1,resolved");
        assert_eq!(lines[2], "S2,Skola S2,Solna,200.0,Side St 2,,,3,no_coordinate");
        assert_eq!(lines[3], "S3,Skola S3,Solna,250.0,,,,2,no_address");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn empty_table_still_has_a_header() {
        let csv = String::from_utf8(report_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv, format!("{}\n", HEADER.join(",")));
    }
}
