//! `experiment.xml`: a read-only summary of the metrics and run attributes
//! already captured in the binary databases, for external tooling that
//! wants metric names without parsing `meta.db`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use quick_xml::writer::Writer;
use quick_xml::Error as XmlError;

use hpa_core::Pipeline;

use crate::error::{self, Error};

fn xml_err(path: &Path, e: XmlError) -> Error {
    error::io(path, std::io::Error::other(e.to_string()))
}

/// Writes `experiment.xml` describing every registered metric and the
/// pipeline's merged attributes. Must run after [`Pipeline::finalize_identifiers`]
/// so metric base indices are assigned.
pub fn write_experiment_xml(dir: &Path, pipeline: &Pipeline) -> Result<PathBuf, Error> {
    let path = dir.join("experiment.xml");
    let file = File::create(&path).map_err(|e| error::io(&path, e))?;
    let mut writer = Writer::new_with_indent(BufWriter::new(file), b' ', 2);

    let attrs = pipeline.attributes();
    writer
        .create_element("HPCToolkitExperiment")
        .with_attribute(("version", "4.0"))
        .write_inner_content(|w| {
            w.create_element("Header")
                .write_inner_content(|w| {
                    for (key, value) in &attrs.fields {
                        w.create_element("Attribute")
                            .with_attribute(("name", key.as_str()))
                            .with_attribute(("value", value.as_str()))
                            .write_empty()?;
                    }
                    Ok(())
                })?;

            w.create_element("MetricTable")
                .write_inner_content(|w| {
                    let metrics = pipeline.metrics().read();
                    for metric in metrics.iter() {
                        let base = metric.base_index().unwrap_or(0).to_string();
                        w.create_element("Metric")
                            .with_attribute(("id", base.as_str()))
                            .with_attribute(("name", metric.name()))
                            .with_attribute(("visible", if metric.visible() { "1" } else { "0" }))
                            .write_inner_content(|w| {
                                for statistic in metric.statistics() {
                                    w.create_element("Statistic")
                                        .with_attribute(("name", statistic.name.as_str()))
                                        .write_empty()?;
                                }
                                Ok(())
                            })?;
                    }
                    Ok(())
                })?;
            Ok(())
        })
        .map_err(|e| xml_err(&path, e.into()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::metric::{MetricScope, MetricSettings};

    #[test]
    fn writes_registered_metrics() {
        let pipeline = Pipeline::new();
        let _mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        pipeline.finalize_identifiers();

        let dir = tempfile::tempdir().unwrap();
        let path = write_experiment_xml(dir.path(), &pipeline).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("cycles"));
        assert!(contents.contains("HPCToolkitExperiment"));
    }
}
