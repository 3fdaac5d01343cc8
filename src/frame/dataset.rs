//! Datasets: a population and the named outputs extracted for each of its patients

use super::{Error, Result, Series};
use crate::{
    builder::{Ready, With},
    measures::Measure,
};

/// Always the first output column
pub const PATIENT_ID: &str = "patient_id";
/// Adding a series under this name sets the population
pub const POPULATION: &str = "population";

#[derive(Clone, Debug, Default)]
pub struct DatasetBuilder {
    population: Option<Series>,
    variables: Vec<(String, Series)>,
    measures: Vec<Measure>,
    /// First error met while building with [With]
    error: Option<Error>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        DatasetBuilder::default()
    }

    pub fn set_population(&mut self, population: Series) -> Result<()> {
        if self.population.is_some() {
            return Err(Error::invalid_definition(POPULATION, "the population is already set"));
        }
        self.population = Some(population);
        Ok(())
    }

    /// Add an output column, in order
    pub fn add<S: Into<String>>(&mut self, name: S, series: Series) -> Result<()> {
        let name = name.into();
        if name == POPULATION {
            self.set_population(series)
        } else if name == PATIENT_ID {
            Err(Error::invalid_definition(name, "the name is reserved"))
        } else if name.is_empty() {
            Err(Error::invalid_definition(name, "outputs must be named"))
        } else if self.variables.iter().any(|(other, _)| *other == name) {
            Err(Error::invalid_definition(name, "declared twice"))
        } else {
            self.variables.push((name, series));
            Ok(())
        }
    }

    pub fn add_measure(&mut self, measure: Measure) -> Result<()> {
        if self.measures.iter().any(|other| other.id() == measure.id()) {
            return Err(Error::invalid_definition(measure.id(), "measure declared twice"));
        }
        self.measures.push(measure);
        Ok(())
    }

    fn record(mut self, result: Result<()>) -> Self {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Measures can only use declared outputs, and any of them as a denominator
    fn check_measure(&self, measure: &Measure) -> Result<()> {
        let declared = |name: &str| self.variables.iter().any(|(other, _)| other == name);
        if !declared(measure.numerator()) {
            return Err(Error::invalid_definition(
                measure.id(),
                format!("unknown numerator {}", measure.numerator()),
            ));
        }
        if measure.denominator() != POPULATION && !declared(measure.denominator()) {
            return Err(Error::invalid_definition(
                measure.id(),
                format!("unknown denominator {}", measure.denominator()),
            ));
        }
        if let Some(group) = measure.group_by().iter().find(|group| !declared(group.as_str())) {
            return Err(Error::invalid_definition(
                measure.id(),
                format!("unknown group {}", group),
            ));
        }
        Ok(())
    }
}

impl<S: Into<String>> With<(S, Series)> for DatasetBuilder {
    fn with(mut self, (name, series): (S, Series)) -> Self {
        let result = self.add(name, series);
        self.record(result)
    }
}

impl With<Measure> for DatasetBuilder {
    fn with(mut self, measure: Measure) -> Self {
        let result = self.add_measure(measure);
        self.record(result)
    }
}

impl Ready<Dataset> for DatasetBuilder {
    type Error = Error;

    fn try_build(mut self) -> Result<Dataset> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let population = self.population.clone().ok_or_else(Error::no_population_defined)?;
        population.check(POPULATION)?;
        for (name, series) in &self.variables {
            series.check(name)?;
        }
        for measure in &self.measures {
            self.check_measure(measure)?;
        }
        Ok(Dataset {
            population,
            variables: self.variables,
            measures: self.measures,
        })
    }
}

/// A validated cohort definition
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    population: Series,
    variables: Vec<(String, Series)>,
    measures: Vec<Measure>,
}

impl Dataset {
    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::new()
    }

    pub fn population(&self) -> &Series {
        &self.population
    }

    /// The outputs in declaration order
    pub fn variables(&self) -> &[(String, Series)] {
        &self.variables
    }

    /// Output columns, `patient_id` first
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once(PATIENT_ID)
            .chain(self.variables.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::WithIterator,
        frame::{patient_table, table, Condition},
    };

    fn registered() -> Series {
        table("practice_registrations")
            .date_in_range("2021-06-25")
            .exists_for_patient()
    }

    #[test]
    fn test_output_order() {
        let mut builder = DatasetBuilder::new();
        builder.add(POPULATION, registered()).unwrap();
        builder.add("sex", patient_table("patients").get("sex")).unwrap();
        for code in ["abc", "def", "ghi"] {
            builder
                .add(
                    format!("has_{code}"),
                    table("clinical_events")
                        .filter("code", Condition::equals(code))
                        .exists_for_patient(),
                )
                .unwrap();
        }
        builder.add("count", table("clinical_events").count_for_patient()).unwrap();
        let dataset = builder.try_build().unwrap();
        assert_eq!(
            dataset.columns(),
            vec!["patient_id", "sex", "has_abc", "has_def", "has_ghi", "count"]
        );
    }

    #[test]
    fn test_no_population() {
        let dataset = DatasetBuilder::new()
            .with(("sex", patient_table("patients").get("sex")))
            .try_build();
        assert!(matches!(dataset, Err(Error::NoPopulationDefined(_))));
    }

    #[test]
    fn test_population_set_twice() {
        let mut builder = DatasetBuilder::new();
        builder.set_population(registered()).unwrap();
        assert!(builder.add(POPULATION, registered()).is_err());
        let built = DatasetBuilder::new()
            .with_iter([(POPULATION, registered()), (POPULATION, registered())])
            .try_build();
        assert!(matches!(built, Err(Error::InvalidDefinition(_))));
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let mut builder = DatasetBuilder::new();
        assert!(builder.add(PATIENT_ID, registered()).is_err());
        builder.add("x", registered()).unwrap();
        assert!(builder.add("x", registered()).is_err());
    }

    #[test]
    fn test_unreduced_output() {
        let dataset = DatasetBuilder::new()
            .with((POPULATION, registered()))
            .with(("codes", table("clinical_events").get("code")))
            .try_build();
        println!("{:?}", dataset);
        assert!(matches!(
            dataset,
            Err(Error::FrameNotReduced(message)) if message.contains("codes")
        ));
    }

    #[test]
    fn test_unsorted_output() {
        let dataset = DatasetBuilder::new()
            .with((POPULATION, registered()))
            .with(("code", table("clinical_events").first_for_patient().get("code")))
            .try_build();
        assert!(matches!(dataset, Err(Error::UnsortedFrame(_))));
    }

    #[test]
    fn test_measures() {
        let builder = DatasetBuilder::new()
            .with((POPULATION, registered()))
            .with(("died", patient_table("patients").get("date_of_death")))
            .with((
                "region",
                table("practice_registrations")
                    .latest_on("date_end")
                    .get("nuts1_region_name"),
            ));
        let dataset = builder
            .clone()
            .with(Measure::new("death_rate", "died", POPULATION, ["region"]))
            .try_build()
            .unwrap();
        assert_eq!(dataset.measures().len(), 1);
        let unknown = builder
            .with(Measure::new("death_rate", "died", POPULATION, ["practice"]))
            .try_build();
        assert!(matches!(unknown, Err(Error::InvalidDefinition(_))));
    }
}
