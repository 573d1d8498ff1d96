use super::analyses::{
    AreaPerMolecule, DensityOfStates, DensityProfile, DynamicIncoherentStructureFactor,
    Eccentricity, MeanSquareDisplacement, PairDistributionFunction, SolventAccessibleSurface,
    SpatialDensity,
};
use crate::engine::configurators::Setting;
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Analysis;
use phf::phf_map;
use tracing::{debug, instrument};

type SettingsFn = fn() -> Vec<Setting>;
type BuildFn = fn(&toml::Table, &Environment) -> Result<Box<dyn Analysis>, JobError>;

/// A registered analysis.
pub struct AnalysisEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub settings: SettingsFn,
    build: BuildFn,
}

macro_rules! entry {
    ($ty:ident, $description:literal) => {
        AnalysisEntry {
            name: stringify!($ty),
            description: $description,
            settings: $ty::settings,
            build: |parameters, env| {
                $ty::new(parameters, env).map(|job| Box::new(job) as Box<dyn Analysis>)
            },
        }
    };
}

static ANALYSES: phf::Map<&'static str, AnalysisEntry> = phf_map! {
    "AreaPerMolecule" => entry!(AreaPerMolecule, "Cell face area per molecule over time"),
    "DensityOfStates" => entry!(DensityOfStates, "Velocity autocorrelation and its spectrum"),
    "DensityProfile" => entry!(DensityProfile, "Atom density along a cell axis"),
    "DynamicIncoherentStructureFactor" => entry!(
        DynamicIncoherentStructureFactor,
        "Self intermediate scattering function and its spectrum"
    ),
    "Eccentricity" => entry!(Eccentricity, "Shape of a selection from its inertia tensor"),
    "MeanSquareDisplacement" => entry!(MeanSquareDisplacement, "Mean square displacement per element"),
    "PairDistributionFunction" => entry!(
        PairDistributionFunction,
        "Pair, radial and total correlation functions"
    ),
    "SolventAccessibleSurface" => entry!(SolventAccessibleSurface, "Accessible surface area over time"),
    "SpatialDensity" => entry!(SpatialDensity, "Density map around a reference molecule"),
};

/// Registered analysis names, sorted.
pub fn analysis_names() -> Vec<&'static str> {
    let mut names: Vec<_> = ANALYSES.keys().copied().collect();
    names.sort_unstable();
    names
}

pub fn entry(name: &str) -> Result<&'static AnalysisEntry, JobError> {
    ANALYSES
        .get(name)
        .ok_or_else(|| JobError::UnknownJob(name.to_string()))
}

/// The settings table of analysis `name`.
pub fn settings_of(name: &str) -> Result<Vec<Setting>, JobError> {
    entry(name).map(|e| (e.settings)())
}

/// Configures analysis `name` from `parameters`.
///
/// # Errors
///
/// Returns [`JobError::UnknownJob`] for an unregistered name, or the configuration error
/// raised while validating `parameters`.
#[instrument(skip(parameters, env), name = "build_analysis")]
pub fn build(
    name: &str,
    parameters: &toml::Table,
    env: &Environment,
) -> Result<Box<dyn Analysis>, JobError> {
    let entry = entry(name)?;
    debug!(n_parameters = parameters.len(), "Configuring analysis");
    (entry.build)(parameters, env)
}

#[cfg(test)]
mod tests {
    use super::super::analyses::testing::{env, frame, parameters, waters, write_trajectory};
    use super::*;
    use crate::engine::configurators::ConfigurationError;
    use crate::engine::progress::ProgressReporter;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    #[test]
    fn every_entry_is_keyed_by_its_name() {
        let names = analysis_names();
        assert_eq!(names.len(), 9);
        for name in names {
            assert_eq!(entry(name).unwrap().name, name);
            assert!(!settings_of(name).unwrap().is_empty());
        }
    }

    #[test]
    fn every_analysis_reads_a_trajectory() {
        for name in analysis_names() {
            let settings = settings_of(name).unwrap();
            assert!(settings.iter().any(|s| s.name == "trajectory"), "{name}");
            assert!(settings.iter().any(|s| s.name == "running_mode"), "{name}");
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(settings_of("Nope"), Err(JobError::UnknownJob(name)) if name == "Nope"));
        let result = build("Nope", &toml::Table::new(), &env());
        assert!(matches!(result, Err(JobError::UnknownJob(_))));
    }

    #[test]
    fn built_analysis_runs_through_the_trait_object() {
        let env = env();
        let dir = tempdir().unwrap();
        let system = waters(&env, 1);
        let coordinates = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(0.0, 0.1, 0.0),
        ];
        let frames: Vec<_> = (0..4).map(|t| frame(t as f64, None, coordinates.clone())).collect();
        let path = write_trajectory(dir.path(), "wat.mdt", &system, &frames);

        let mut analysis = build("MeanSquareDisplacement", &parameters(&path, ""), &env).unwrap();
        assert_eq!(analysis.analysis_name(), "MeanSquareDisplacement");
        let outcome = analysis.execute(None, &ProgressReporter::new()).unwrap();
        assert!(!outcome.is_cancelled());
        assert!(outcome.output().get("msd_total").unwrap().data.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn unknown_parameters_fail_the_build() {
        let env = env();
        let dir = tempdir().unwrap();
        let system = waters(&env, 1);
        let frames = vec![frame(0.0, None, vec![Vector3::zeros(); 3])];
        let path = write_trajectory(dir.path(), "wat.mdt", &system, &frames);
        let result = build("Eccentricity", &parameters(&path, "colour = 'blue'"), &env);
        assert!(matches!(
            result,
            Err(JobError::Configuration(ConfigurationError::UnknownParameter(p))) if p == "colour"
        ));
    }
}
