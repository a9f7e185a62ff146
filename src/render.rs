use std::{fmt::Write as _, path::Path};

use serde::Serialize;

use crate::{
    load::Owner,
    process::EnrichedSchool,
    rank::{ColorScale, PALETTE},
    Result, MAX_MERIT,
};

/// Roughly the middle of Sweden.
const MAP_CENTER: (f64, f64) = (62.0, 15.0);
const MAP_ZOOM: u8 = 5;
const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// Colour by merit value.
    Merit,
    /// Same colouring, every marker labelled with its national rank.
    Ranked,
}

impl MapKind {
    fn title(&self) -> &'static str {
        match self {
            MapKind::Merit => "School merit values",
            MapKind::Ranked => "School rankings",
        }
    }

    fn radius(&self) -> u8 {
        match self {
            MapKind::Merit => 6,
            MapKind::Ranked => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Circle,
    Diamond,
}

/// Everything the page script needs to draw one school.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub lat: f64,
    pub lng: f64,
    pub color: &'static str,
    pub shape: Shape,
    pub radius: u8,
    pub popup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One marker per school with a coordinate; the rest are left off the map.
pub fn markers(schools: &[EnrichedSchool], kind: MapKind) -> Vec<Marker> {
    let total = schools.len();
    schools
        .iter()
        .filter_map(|school| {
            let coord = school.coordinate?;
            Some(Marker {
                lat: coord.lat,
                lng: coord.lng,
                color: school.color,
                shape: match school.record.owner {
                    Owner::Independent => Shape::Diamond,
                    Owner::Municipal | Owner::Unknown => Shape::Circle,
                },
                radius: kind.radius(),
                popup: popup(school, kind, total),
                label: (kind == MapKind::Ranked).then(|| school.standing.rank.to_string()),
            })
        })
        .collect()
}

fn popup(school: &EnrichedSchool, kind: MapKind, total: usize) -> String {
    let rec = &school.record;
    let mut html = String::new();
    match kind {
        MapKind::Merit => {
            let _ = write!(html, "<b>{}</b>", escape(&rec.name));
        }
        MapKind::Ranked => {
            let _ = write!(html, "<b>#{} - {}</b>", school.standing.rank, escape(&rec.name));
        }
    }
    if rec.owner != Owner::Unknown {
        let _ = write!(html, "<br>Type: {}", rec.owner.label());
    }
    let _ = write!(html, "<br>Merit: {:.1}/{}", rec.merit, MAX_MERIT);
    if kind == MapKind::Ranked {
        let _ = write!(
            html,
            "<br>Rank: {} of {} in Sweden<br>Higher merit than {:.0}% of schools",
            school.standing.rank, total, school.standing.percentile
        );
    }
    let _ = write!(html, "<br>Municipality: {}", escape(&rec.municipality));
    if let Some(address) = &school.address {
        let _ = write!(html, "<br>Address: {}", escape(address));
    }
    html
}

/// Builds a complete Leaflet page. Only the Leaflet assets come from a CDN,
/// the markers are embedded as JSON.
pub fn render_map(
    schools: &[EnrichedSchool],
    scale: Option<ColorScale>,
    kind: MapKind,
) -> Result<String> {
    let markers = markers(schools, kind);
    // Keep a `</script>` inside some school name from closing the data block.
    let data = serde_json::to_string(&markers)?.replace("</", "<\\/");
    let legend = legend(&markers, scale, kind);

    let mut page = String::with_capacity(data.len() + 8 * 1024);
    page.push_str("<!DOCTYPE html>\n<html lang=\"sv\">\n<head>\n<meta charset=\"utf-8\">\n");
    page.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(page, "<title>{}</title>", kind.title());
    let _ = writeln!(page, "<link rel=\"stylesheet\" href=\"{LEAFLET_CSS}\">");
    let _ = writeln!(page, "<script src=\"{LEAFLET_JS}\"></script>");
    page.push_str(PAGE_STYLE);
    page.push_str("</head>\n<body>\n<div id=\"map\"></div>\n");
    page.push_str(&legend);
    let _ = writeln!(page, "<script>\nvar schools = {data};");
    let _ = writeln!(
        page,
        "var map = L.map('map').setView([{}, {}], {});",
        MAP_CENTER.0, MAP_CENTER.1, MAP_ZOOM
    );
    page.push_str(PAGE_SCRIPT);
    page.push_str("</script>\n</body>\n</html>\n");
    Ok(page)
}

pub async fn write_map(
    path: &Path,
    schools: &[EnrichedSchool],
    scale: Option<ColorScale>,
    kind: MapKind,
) -> Result<usize> {
    let page = render_map(schools, scale, kind)?;
    tokio::fs::write(path, page).await?;
    Ok(schools.iter().filter(|s| s.coordinate.is_some()).count())
}

fn legend(markers: &[Marker], scale: Option<ColorScale>, kind: MapKind) -> String {
    let mut html = String::from("<div class=\"legend\">\n");
    let _ = writeln!(html, "<h3>{}</h3>", kind.title());
    if kind == MapKind::Ranked {
        let _ = writeln!(
            html,
            "<p class=\"note\"><b>Numbers show rank in Sweden</b><br>#1 = highest merit value</p>"
        );
    }

    let diamonds = markers.iter().filter(|m| m.shape == Shape::Diamond).count();
    let _ = writeln!(
        html,
        "<div class=\"row\"><span class=\"swatch diamond\"></span>Private (Enskild): {}</div>",
        diamonds
    );
    let _ = writeln!(
        html,
        "<div class=\"row\"><span class=\"swatch\"></span>Municipal / other: {}</div>",
        markers.len() - diamonds
    );

    html.push_str("<h4>Merit value scale</h4>\n<p class=\"note\">Red (low) &rarr; Blue (high)</p>\n");
    if let Some(scale) = scale {
        for (i, color) in PALETTE.iter().enumerate() {
            let (from, to) = scale.band_range(i);
            let _ = writeln!(
                html,
                "<div class=\"row\"><span class=\"swatch\" style=\"background:{color}\"></span>{from:.0} - {to:.0}</div>"
            );
        }
        let _ = writeln!(
            html,
            "<p class=\"note total\">Total: {} schools mapped<br>Range: {:.1} - {:.1}</p>",
            markers.len(),
            scale.min,
            scale.max
        );
    } else {
        html.push_str("<p class=\"note total\">No schools to show</p>\n");
    }
    html.push_str("</div>\n");
    html
}

/// Minimal HTML escaping for text placed in popups.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const PAGE_STYLE: &str = r#"<style>
html, body, #map { height: 100%; margin: 0; }
.legend { position: fixed; top: 20px; right: 20px; width: 230px; background: white;
  border: 3px solid #333; border-radius: 10px; padding: 12px; z-index: 9999;
  font: 14px sans-serif; box-shadow: 0 4px 8px rgba(0,0,0,0.3); }
.legend h3 { margin: 0 0 10px 0; font-size: 16px; color: #333; }
.legend h4 { margin: 8px 0 5px 0; font-size: 14px; color: #333; }
.legend .note { margin: 0 0 8px 0; font-size: 12px; color: #666; }
.legend .total { margin-top: 12px; border-top: 1px solid #ccc; padding-top: 8px; }
.legend .row { display: flex; align-items: center; margin: 3px 0; font-size: 13px; }
.legend .swatch { width: 14px; height: 14px; border-radius: 50%; margin-right: 8px; background: #666; }
.legend .swatch.diamond { border-radius: 0; transform: rotate(45deg); width: 11px; height: 11px; }
.rank-label { font-size: 11px; font-weight: bold; color: white; text-shadow: 1px 1px 2px black;
  background: rgba(0,0,0,0.6); padding: 1px 3px; border-radius: 3px; white-space: nowrap; }
</style>
"#;

const PAGE_SCRIPT: &str = r#"L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
  maxZoom: 19,
  attribution: '&copy; OpenStreetMap contributors'
}).addTo(map);

schools.forEach(function (s) {
  var shape;
  if (s.shape === 'diamond') {
    var size = 2 * s.radius;
    shape = L.marker([s.lat, s.lng], {
      icon: L.divIcon({
        className: '',
        html: '<div style="width:' + size + 'px;height:' + size + 'px;background:' + s.color +
          ';opacity:0.8;border:2px solid black;transform:rotate(45deg)"></div>',
        iconSize: [size, size]
      })
    });
  } else {
    shape = L.circleMarker([s.lat, s.lng], {
      radius: s.radius, color: s.color, weight: 2,
      fill: true, fillColor: s.color, fillOpacity: 0.8
    });
  }
  shape.bindPopup(s.popup).addTo(map);

  if (s.label) {
    L.marker([s.lat, s.lng], {
      interactive: false,
      icon: L.divIcon({
        className: '',
        html: '<div class="rank-label">' + s.label + '</div>',
        iconSize: [30, 15],
        iconAnchor: [-15, 8]
      })
    }).addTo(map);
  }
});
"#;
