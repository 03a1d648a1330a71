//! CSV export and the plain-text results report.

use std::fmt;
use std::path::Path;

use super::{AccuracyResult, Estimate};
use crate::error::{Error, Result};

const NOT_APPLICABLE: &str = "n/a";

/// CSV writer with caller-chosen field and decimal separators.
#[derive(Debug, Clone, Copy)]
pub struct CsvFormat {
    pub separator: char,
    pub decimal_separator: char,
}

impl CsvFormat {
    pub fn new(separator: char, decimal_separator: char) -> Result<Self> {
        if separator == decimal_separator {
            return Err(Error::InvalidInput(format!(
                "field and decimal separators are both {separator:?}"
            )));
        }
        Ok(Self { separator, decimal_separator })
    }

    fn number(&self, v: f64, decimals: usize) -> String {
        let s = format!("{v:.decimals$}");
        if self.decimal_separator == '.' {
            s
        } else {
            s.replace('.', &self.decimal_separator.to_string())
        }
    }

    fn optional(&self, v: Option<f64>, decimals: usize) -> String {
        v.map(|v| self.number(v, decimals)).unwrap_or_else(|| NOT_APPLICABLE.to_string())
    }

    fn row(&self, out: &mut String, cells: &[String]) {
        let sep = self.separator.to_string();
        out.push_str(&cells.join(&sep));
        out.push('\n');
    }

    /// Every result table, blank-line separated: error matrix with totals,
    /// area proportions, accuracy estimates and area estimates.
    pub fn render(&self, result: &AccuracyResult) -> String {
        let mut out = String::new();
        let m = &result.matrix;
        let n = m.size();
        let headers: Vec<String> = m.values().iter().map(|v| v.to_string()).collect();

        self.row(&mut out, &["Error matrix".into()]);
        let mut head = vec!["thematic \\ classified".to_string()];
        head.extend(headers.iter().cloned());
        head.push("Total".into());
        self.row(&mut out, &head);
        for i in 0..n {
            let mut cells = vec![headers[i].clone()];
            cells.extend((0..n).map(|j| m.get(i, j).to_string()));
            cells.push(m.row_sum(i).to_string());
            self.row(&mut out, &cells);
        }
        let mut totals = vec!["Total".to_string()];
        totals.extend((0..n).map(|j| m.column_sum(j).to_string()));
        totals.push(m.total().to_string());
        self.row(&mut out, &totals);
        out.push('\n');

        self.row(&mut out, &["Error matrix of estimated area proportion".into()]);
        let mut head = vec!["thematic \\ classified".to_string()];
        head.extend(headers.iter().cloned());
        head.push("Wi".into());
        self.row(&mut out, &head);
        for (i, class) in result.classes.iter().enumerate() {
            let mut cells = vec![headers[i].clone()];
            cells.extend(result.proportions[i].iter().map(|&p| self.number(p, 4)));
            cells.push(self.number(class.weight, 4));
            self.row(&mut out, &cells);
        }
        out.push('\n');

        self.row(&mut out, &["Accuracy".into()]);
        self.row(
            &mut out,
            &[
                "class".into(),
                "user's accuracy".into(),
                "user's SE".into(),
                "user's CI".into(),
                "producer's accuracy".into(),
                "producer's SE".into(),
                "producer's CI".into(),
            ],
        );
        for class in &result.classes {
            let mut cells = vec![class.value.to_string()];
            self.estimate_cells(&mut cells, &class.users_accuracy);
            self.estimate_cells(&mut cells, &class.producers_accuracy);
            self.row(&mut out, &cells);
        }
        let mut overall = vec!["overall".to_string()];
        self.estimate_cells(&mut overall, &result.overall_accuracy);
        self.row(&mut out, &overall);
        out.push('\n');

        let unit = result.area_unit.abbreviation();
        self.row(&mut out, &[format!("Area ({unit})")]);
        self.row(
            &mut out,
            &["class".into(), "mapped area".into(), "estimated area".into(), "SE".into(), "CI".into()],
        );
        for class in &result.classes {
            let mut cells = vec![class.value.to_string(), self.number(class.mapped_area, 2)];
            cells.push(self.optional(class.estimated_area.value, 2));
            cells.push(self.optional(class.estimated_area.std_error, 2));
            cells.push(self.optional(class.estimated_area.half_width, 2));
            self.row(&mut out, &cells);
        }
        self.row(&mut out, &["total".into(), self.number(result.total_area, 2)]);
        out
    }

    fn estimate_cells(&self, cells: &mut Vec<String>, e: &Estimate) {
        cells.push(self.optional(e.value, 4));
        cells.push(self.optional(e.std_error, 4));
        cells.push(self.optional(e.half_width, 4));
    }

    /// Write the rendered tables to `path`. In-memory results are untouched
    /// on failure.
    pub fn write(&self, result: &AccuracyResult, path: &Path) -> Result<()> {
        std::fs::write(path, self.render(result))?;
        Ok(())
    }
}

fn opt(v: Option<f64>, decimals: usize) -> String {
    v.map(|v| format!("{v:.decimals$}")).unwrap_or_else(|| NOT_APPLICABLE.to_string())
}

/// Human-readable report.
impl fmt::Display for AccuracyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.matrix;
        let n = m.size();
        writeln!(f, "Accuracy assessment")?;
        writeln!(f, "  samples: {}  classes: {}  z score: {}", self.samples(), n, self.z_score)?;
        writeln!(f, "  pixel area: {} {}", self.pixel_area, self.area_unit)?;
        if !self.outside_thematic.is_empty() {
            let ids: Vec<String> = self.outside_thematic.iter().map(|id| id.to_string()).collect();
            writeln!(f, "  samples outside the thematic map: {}", ids.join(", "))?;
        }
        writeln!(f)?;

        write!(f, "{:>10}", "")?;
        for v in m.values() {
            write!(f, "{v:>8}")?;
        }
        writeln!(f, "{:>8}", "total")?;
        for i in 0..n {
            write!(f, "{:>10}", m.values()[i])?;
            for j in 0..n {
                write!(f, "{:>8}", m.get(i, j))?;
            }
            writeln!(f, "{:>8}", m.row_sum(i))?;
        }
        write!(f, "{:>10}", "total")?;
        for j in 0..n {
            write!(f, "{:>8}", m.column_sum(j))?;
        }
        writeln!(f, "{:>8}", m.total())?;
        writeln!(f)?;

        writeln!(f, "{:<16}{:>18}{:>22}{:>22}", "class", "user's", "producer's", "est. area")?;
        for c in &self.classes {
            let name = match &c.name {
                Some(name) => format!("{} {}", c.value, name),
                None => c.value.to_string(),
            };
            writeln!(
                f,
                "{:<16}{:>18}{:>22}{:>22}",
                name,
                format!("{} ± {}", opt(c.users_accuracy.value, 3), opt(c.users_accuracy.half_width, 3)),
                format!("{} ± {}", opt(c.producers_accuracy.value, 3), opt(c.producers_accuracy.half_width, 3)),
                format!("{} ± {}", opt(c.estimated_area.value, 1), opt(c.estimated_area.half_width, 1)),
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "overall accuracy: {} ± {} (unweighted {})",
            opt(self.overall_accuracy.value, 3),
            opt(self.overall_accuracy.half_width, 3),
            opt(self.point_overall_accuracy, 3)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::units::AreaUnit;
    use crate::accuracy::ErrorMatrix;

    fn result() -> AccuracyResult {
        let m = ErrorMatrix::from_labels(&[1, 1, 2, 2], &[1, 2, 2, 2]).unwrap();
        AccuracyResult::from_matrix(m, &[300, 100], 2.0, AreaUnit::SquareMeters, 1.96)
    }

    #[test]
    fn csv_uses_requested_separators() {
        let csv = CsvFormat::new(';', ',').unwrap().render(&result());
        assert!(csv.contains("thematic \\ classified;1;2;Total\n"));
        assert!(csv.contains("1;1;1;2\n"));
        assert!(csv.contains("Total;1;3;4\n"));
        assert!(csv.contains("0,3750"));
        assert!(!csv.contains("0.3750"));
        // Class 2 has no disagreement, so its user's SE is 0.
        assert!(csv.contains("2;1,0000;0,0000;0,0000"));
    }

    #[test]
    fn undefined_values_render_as_not_applicable() {
        let m = ErrorMatrix::from_labels(&[1], &[3]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[4, 0], 1.0, AreaUnit::SquareMeters, 1.96);
        let csv = CsvFormat::new(',', '.').unwrap().render(&r);
        assert!(csv.contains("3,n/a,n/a,n/a"));
        assert!(r.to_string().contains("n/a"));
    }

    #[test]
    fn same_separators_are_rejected() {
        assert!(CsvFormat::new(',', ',').is_err());
    }

    #[test]
    fn csv_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        CsvFormat::new(';', '.').unwrap().write(&result(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Error matrix\n"));
    }

    #[test]
    fn report_lists_overall_accuracy() {
        let text = result().to_string();
        assert!(text.contains("overall accuracy: 0.625"));
        assert!(text.contains("(unweighted 0.750)"));
        assert!(text.contains(&format!("{:>10}{:>8}{:>8}{:>8}\n", "", 1, 2, "total")));
        assert!(text.contains(&format!("{:>10}{:>8}{:>8}{:>8}\n", 1, 1, 1, 2)));
        assert!(text.contains(&format!("{:>10}{:>8}{:>8}{:>8}\n", "total", 1, 3, 4)));
    }
}
