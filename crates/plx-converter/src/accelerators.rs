//! Accelerator inference from resources and annotations

use std::collections::BTreeMap;

use plx_schema::k8s::Container;

use crate::error::ConverterError;
use crate::Result;

/// Accelerators a pod asks for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Accelerators {
    /// Any resource key containing `gpu` with a positive value
    pub gpu: bool,
    /// Any annotation or resource key containing `tpu`
    pub tpu: bool,
}

impl Accelerators {
    /// Inspect every container of a pod and the pod annotations
    pub fn infer<'a>(
        containers: impl IntoIterator<Item = &'a Container>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut found = Self {
            gpu: false,
            tpu: annotations.keys().any(|k| k.to_lowercase().contains("tpu")),
        };
        for container in containers {
            for (key, quantity) in container.resource_keys() {
                let lower = key.to_lowercase();
                if lower.contains("tpu") {
                    found.tpu = true;
                }
                if lower.contains("gpu") {
                    let value = quantity.as_f64().ok_or_else(|| ConverterError::AccelInference {
                        key: key.clone(),
                        message: format!("`{}` is not a quantity", quantity),
                    })?;
                    if value > 0.0 {
                        found.gpu = true;
                    }
                }
            }
        }
        Ok(found)
    }

    /// Whether anything was requested
    pub fn any(&self) -> bool {
        self.gpu || self.tpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plx_schema::k8s::ResourceRequirements;
    use rstest::rstest;

    fn with_limits(limits: &[(&str, &str)]) -> Container {
        Container {
            resources: Some(ResourceRequirements::new(&[], limits)),
            ..Container::with_image("trainer")
        }
    }

    #[rstest]
    #[case::cpu_only(&[("cpu", "2")], false, false)]
    #[case::nvidia(&[("nvidia.com/gpu", "1")], true, false)]
    #[case::zero_gpu(&[("nvidia.com/gpu", "0")], false, false)]
    #[case::tpu_resource(&[("cloud-tpus.google.com/v3", "8")], false, true)]
    fn resource_inference(#[case] limits: &[(&str, &str)], #[case] gpu: bool, #[case] tpu: bool) {
        let found = Accelerators::infer([&with_limits(limits)], &BTreeMap::new()).unwrap();
        assert_eq!(found, Accelerators { gpu, tpu });
    }

    #[test]
    fn tpu_from_annotations() {
        let annotations = BTreeMap::from([(
            "tf-version.cloud-tpus.google.com".to_string(),
            "2.12".to_string(),
        )]);
        let found = Accelerators::infer(std::iter::empty::<&Container>(), &annotations).unwrap();
        assert!(found.tpu);
        assert!(!found.gpu);
    }

    #[test]
    fn unparsable_gpu_quantity_fails() {
        let err = Accelerators::infer([&with_limits(&[("nvidia.com/gpu", "lots")])], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ConverterError::AccelInference { ref key, .. } if key == "nvidia.com/gpu"));
    }
}
