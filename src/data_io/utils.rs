/// Naming conventions of gridded climate files

/// Candidate names of the time coordinate, tried in order
pub const TIME_NAMES: &[&str] = &["time", "Time", "XTIME", "valid_time"];

/// Check if a variable name represents a coordinate or grid-mapping variable
///
/// Such variables are never picked as the data variable.
pub fn is_coordinate_var(variable_name: &str) -> bool {
    let lower = variable_name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "time"
            | "xtime"
            | "times"
            | "valid_time"
            | "lat"
            | "lon"
            | "latitude"
            | "longitude"
            | "nav_lat"
            | "nav_lon"
            | "xlat"
            | "xlong"
            | "lat2d"
            | "lon2d"
            | "x"
            | "y"
            | "member"
            | "crs"
            | "lambert_conformal_conic"
            | "rotated_pole"
    ) || lower.ends_with("_bnds")
        || lower.ends_with("_bounds")
}

/// Select the data variable among `(name, rank)` candidates
///
/// Returns the single non-coordinate variable of rank 3, if there is exactly one.
pub fn detect_data_variable<'a>(variables: impl IntoIterator<Item = (&'a str, usize)>) -> Result<&'a str, Vec<&'a str>> {
    let candidates: Vec<&str> = variables
        .into_iter()
        .filter(|(name, rank)| *rank == 3 && !is_coordinate_var(name))
        .map(|(name, _)| name)
        .collect();
    match candidates.as_slice() {
        [only] => Ok(*only),
        _ => Err(candidates),
    }
}
