use json::JsonValue;
use log::{info, warn};
use nalgebra::Vector2;

use crate::{
    datatypes::{BoundaryAssignment, Geometry, ModelMetadata, SolverKind, Vertex},
    error::{BracketError, Result},
    mesher::ClipMode,
};

/// Everything read from an input file
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub metadata: ModelMetadata,
    pub clip: ClipMode,
    pub geometry: Option<Geometry>,
    pub boundary_conditions: Vec<(String, BoundaryAssignment)>,
}

fn read_file(path: &str, kind: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|err| BracketError::Input(format!("Unable to open {kind} file {path}: {err}")))
}

/// Reads a point pair such as `[200, 900]`
fn parse_pair(value: &JsonValue, context: &str) -> Result<[f64; 2]> {
    if !value.is_array() || value.len() != 2 {
        return Err(BracketError::Input(format!(
            "{context} must be a two element array"
        )));
    }
    match (value[0].as_f64(), value[1].as_f64()) {
        (Some(x), Some(y)) => Ok([x, y]),
        _ => Err(BracketError::Input(format!(
            "{context} contains a non-numeric value"
        ))),
    }
}

/// Parses an input file into a JsonValue, checking the required sections
///
/// # Arguments
/// * `contents` - The text of the input file
pub fn parse_input_json(contents: &str) -> Result<JsonValue> {
    let input_json = json::parse(contents)
        .map_err(|err| BracketError::Input(format!("Error in input file json: {err}")))?;

    if !input_json.has_key("metadata") {
        return Err(BracketError::Input(
            "Input json missing metadata field".to_owned(),
        ));
    }
    if !input_json.has_key("boundary_conditions") {
        return Err(BracketError::Input(
            "Input json missing boundary_conditions field".to_owned(),
        ));
    }

    Ok(input_json)
}

/// Parses Model Metadata from the input json
///
/// # Arguments
/// * `input_json` - The input file as a JsonValue object
pub fn parse_input_metadata(input_json: &JsonValue) -> Result<ModelMetadata> {
    let metadata = &input_json["metadata"];

    let field = |name: &str| -> Result<f64> {
        metadata[name].as_f64().ok_or_else(|| {
            BracketError::Input(format!("Input json missing {name} in metadata section"))
        })
    };

    let model = ModelMetadata::new(
        field("material_elasticity")?,
        field("poisson_ratio")?,
        field("part_thickness")?,
        field("max_edge_length")?,
    )?;

    let solver = match metadata["solver"].as_str() {
        None | Some("lu") => SolverKind::Lu,
        Some("cg") | Some("conjugate_gradient") => SolverKind::ConjugateGradient,
        Some(other) => {
            return Err(BracketError::Input(format!(
                "Unknown solver '{other}', expected lu or cg"
            )))
        }
    };

    Ok(model.with_solver(solver))
}

/// Parses the clipping mode. A missing field clips to the input polygons.
pub fn parse_clip_mode(input_json: &JsonValue) -> Result<ClipMode> {
    let clip = &input_json["metadata"]["clip"];

    if clip.is_null() {
        return Ok(ClipMode::Polygons);
    }
    if let Some(mode) = clip.as_str() {
        return match mode {
            "none" => Ok(ClipMode::None),
            "polygons" => Ok(ClipMode::Polygons),
            other => Err(BracketError::Input(format!(
                "Unknown clip mode '{other}', expected none, polygons or outside_edge"
            ))),
        };
    }
    if clip.has_key("outside_edge") {
        let reference = parse_pair(&clip["outside_edge"], "clip.outside_edge")?;
        return Ok(ClipMode::OutsideEdge(Vertex::from(reference)));
    }

    Err(BracketError::Input("Malformed clip field".to_owned()))
}

/// Reads an array of polygons, each an array of points
fn parse_polygons(value: &JsonValue, field: &str) -> Result<Vec<Vec<Vertex>>> {
    if !value.is_array() {
        return Err(BracketError::Input(format!(
            "{field} must be an array of polygons"
        )));
    }

    let mut polygons = Vec::with_capacity(value.len());
    for (i, polygon) in value.members().enumerate() {
        if !polygon.is_array() {
            return Err(BracketError::Input(format!("{field}[{i}] is not an array")));
        }
        let points = polygon
            .members()
            .enumerate()
            .map(|(j, point)| parse_pair(point, &format!("{field}[{i}][{j}]")).map(Vertex::from))
            .collect::<Result<Vec<Vertex>>>()?;
        polygons.push(points);
    }

    Ok(polygons)
}

/// Parses the optional `geometry` field, an array of solid polygons, and the
/// `holes` field that may accompany it
pub fn parse_geometry_json(input_json: &JsonValue) -> Result<Option<Geometry>> {
    let geometry = &input_json["geometry"];
    let holes = &input_json["holes"];

    if geometry.is_null() {
        if !holes.is_null() {
            return Err(BracketError::Input(
                "holes given without a geometry field".to_owned(),
            ));
        }
        return Ok(None);
    }

    Ok(Some(Geometry {
        polygons: parse_polygons(geometry, "geometry")?,
        holes: if holes.is_null() {
            Vec::new()
        } else {
            parse_polygons(holes, "holes")?
        },
    }))
}

/// Reads the boundary rules of the input json
///
/// Each rule names a `point` and exactly one of `fixed`, `displacement` or
/// `load` (with an optional `direction`).
pub fn parse_boundary_conditions(
    input_json: &JsonValue,
) -> Result<Vec<(String, BoundaryAssignment)>> {
    let mut rules: Vec<(String, BoundaryAssignment)> = Vec::new();

    for (name, rule_json) in input_json["boundary_conditions"].entries() {
        if !rule_json.has_key("point") {
            return Err(BracketError::Input(format!(
                "Boundary rule {name} is missing point field"
            )));
        }
        let point = Vertex::from(parse_pair(&rule_json["point"], &format!("{name}.point"))?);

        let fixed = rule_json["fixed"].as_bool().unwrap_or(false);
        let displacement = rule_json.has_key("displacement");
        let load = rule_json.has_key("load");

        let assignment = match (fixed, displacement, load) {
            (true, false, false) => BoundaryAssignment::Fixed { point },
            (false, true, false) => {
                let [ux, uy] = parse_pair(&rule_json["displacement"], &format!("{name}.displacement"))?;
                BoundaryAssignment::Displacement { point, ux, uy }
            }
            (false, false, true) => {
                let magnitude = rule_json["load"].as_f64().ok_or_else(|| {
                    BracketError::Input(format!("Bad value for load in {name}"))
                })?;
                let direction = if rule_json.has_key("direction") {
                    let [dx, dy] = parse_pair(&rule_json["direction"], &format!("{name}.direction"))?;
                    Some(Vector2::new(dx, dy))
                } else {
                    None
                };
                BoundaryAssignment::Load {
                    point,
                    magnitude,
                    direction,
                }
            }
            (false, false, false) => {
                return Err(BracketError::Input(format!(
                    "Boundary '{name}' is under-constrained: needs fixed, displacement or load"
                )))
            }
            _ => {
                return Err(BracketError::Input(format!(
                    "Boundary '{name}' is over-constrained: use one of fixed, displacement or load"
                )))
            }
        };

        rules.push((name.to_string(), assignment));
    }

    info!("loaded {} boundary rules from input file", rules.len());

    Ok(rules)
}

/// Parses a complete input file
pub fn parse_input(contents: &str) -> Result<AnalysisInput> {
    let input_json = parse_input_json(contents)?;

    Ok(AnalysisInput {
        metadata: parse_input_metadata(&input_json)?,
        clip: parse_clip_mode(&input_json)?,
        geometry: parse_geometry_json(&input_json)?,
        boundary_conditions: parse_boundary_conditions(&input_json)?,
    })
}

pub fn load_input_file(input_file: &str) -> Result<AnalysisInput> {
    parse_input(&read_file(input_file, "input")?)
}

/// Parses the points of a polyline or polygon `points` attribute, inverting y
fn parse_svg_points(points_raw: &str, id: &str) -> Result<Vec<Vertex>> {
    let values = points_raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|_| {
                BracketError::Input(format!("Non-float value '{s}' in svg points of {id}"))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    if values.len() % 2 != 0 {
        return Err(BracketError::Input(format!(
            "Odd number of coordinates in svg points of {id}"
        )));
    }

    let mut points: Vec<Vertex> = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks_exact(2) {
        let vertex = Vertex::new(pair[0], -pair[1]);

        if points.contains(&vertex) {
            warn!("duplicate point at {vertex:?} in {id}");
            continue;
        }
        points.push(vertex);
    }

    Ok(points)
}

fn svg_attribute_f64(node: &roxmltree::Node, name: &str, id: &str) -> Result<Option<f64>> {
    match node.attribute(name) {
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            BracketError::Input(format!("Non-float {name} '{value}' in svg element {id}"))
        }),
        None => Ok(None),
    }
}

/// Parses svg text into the OUTER outline and its INNER holes
///
/// Polylines, polygons and rects are read; each must carry (or inherit from
/// its parent) an id starting with OUTER or INNER.
pub fn parse_svg_str(contents: &str) -> Result<Geometry> {
    let doc = roxmltree::Document::parse(contents)
        .map_err(|err| BracketError::Input(format!("Malformed svg: {err}")))?;

    let mut outer: Option<Vec<Vertex>> = None;
    let mut inner: Vec<Vec<Vertex>> = Vec::new();

    for shape in doc.descendants().filter(|n| {
        matches!(n.tag_name().name(), "polyline" | "polygon" | "rect")
    }) {
        let id = shape
            .attribute("id")
            .or_else(|| shape.parent().and_then(|parent| parent.attribute("id")))
            .ok_or_else(|| {
                BracketError::Input("Error in svg file. Missing id on shape".to_owned())
            })?
            .trim()
            .to_owned();

        let vertices = if shape.tag_name().name() == "rect" {
            let x = svg_attribute_f64(&shape, "x", &id)?.unwrap_or(0.0);
            let y = svg_attribute_f64(&shape, "y", &id)?.unwrap_or(0.0);
            let width = svg_attribute_f64(&shape, "width", &id)?.ok_or_else(|| {
                BracketError::Input(format!("No width definition in rectangle {id}"))
            })?;
            let height = svg_attribute_f64(&shape, "height", &id)?.ok_or_else(|| {
                BracketError::Input(format!("No height definition in rectangle {id}"))
            })?;

            vec![
                Vertex::new(x, -y),
                Vertex::new(x + width, -y),
                Vertex::new(x + width, -y - height),
                Vertex::new(x, -y - height),
            ]
        } else {
            let points_raw = shape.attribute("points").ok_or_else(|| {
                BracketError::Input(format!("No points in svg element {id}"))
            })?;
            parse_svg_points(points_raw, &id)?
        };

        if id.starts_with("OUTER") {
            if outer.is_some() {
                return Err(BracketError::Input(
                    "Multiple OUTER geometries in SVG".to_owned(),
                ));
            }
            outer = Some(vertices);
        } else if id.starts_with("INNER") {
            inner.push(vertices);
        } else {
            warn!("skipping svg geometry with id {id}. Only supports OUTER and INNER");
        }
    }

    let outer = outer.ok_or_else(|| BracketError::Input("No OUTER geometry".to_owned()))?;

    Ok(Geometry {
        polygons: vec![outer],
        holes: inner,
    })
}

/// Parses csv text with `x` and `y` columns into one polygon
pub fn parse_csv_str(contents: &str) -> Result<Vec<Vertex>> {
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());

    let headers: Vec<&str> = lines
        .next()
        .ok_or_else(|| BracketError::Input("Empty csv file".to_owned()))?
        .split(',')
        .map(str::trim)
        .collect();

    let x_index = headers.iter().position(|h| *h == "x");
    let y_index = headers.iter().position(|h| *h == "y");
    let (x_index, y_index) = match (x_index, y_index) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(BracketError::Input(
                "Error in csv file: Missing x and/or y field".to_owned(),
            ))
        }
    };

    let mut vertices: Vec<Vertex> = Vec::new();
    for (row, line) in lines.enumerate() {
        let values = line
            .split(',')
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| {
                    BracketError::Input(format!("Non-float value in csv row {}", row + 1))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        match (values.get(x_index), values.get(y_index)) {
            (Some(&x), Some(&y)) => vertices.push(Vertex::new(x, y)),
            _ => {
                return Err(BracketError::Input(format!(
                    "Missing column in csv row {}",
                    row + 1
                )))
            }
        }
    }

    Ok(vertices)
}

/// Loads a part from geometry files. An svg supplies the outline and its
/// holes; with csv files the first is the outline and the rest are holes.
pub fn load_geometry_files(geometry_files: &[String]) -> Result<Geometry> {
    let mut geometry = Geometry::default();

    for geom in geometry_files {
        if geom.ends_with(".svg") {
            geometry = parse_svg_str(&read_file(geom, "svg")?)?;
            break;
        } else if geom.ends_with(".csv") {
            let vertices = parse_csv_str(&read_file(geom, "csv")?)?;
            if geometry.polygons.is_empty() {
                geometry.polygons.push(vertices);
            } else {
                geometry.holes.push(vertices);
            }
        } else {
            return Err(BracketError::Input(format!(
                "Unrecognized geometry filetype {geom}"
            )));
        }
    }

    Ok(geometry)
}
