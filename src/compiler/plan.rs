//! Execution plans: the ordered statements of an extraction

use colored::Colorize;
use sqlparser::ast;
use std::fmt;

use crate::{data_type::DataType, dialect::Statement};

/// A statement creating an intermediate result, rendered once
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    purpose: String,
    statement: Statement,
    sql: String,
    teardown: Option<String>,
}

impl Stage {
    pub fn new<S: Into<String>>(
        purpose: S,
        statement: Statement,
        teardown: Option<ast::Statement>,
    ) -> Self {
        Stage {
            purpose: purpose.into(),
            sql: statement.to_string(),
            statement,
            teardown: teardown.as_ref().map(ToString::to_string),
        }
    }

    /// What the stage computes, reported with execution errors
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn name(&self) -> &str {
        self.statement.name()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn teardown(&self) -> Option<&str> {
        self.teardown.as_deref()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "--".dimmed(), self.purpose.bold().green())?;
        write!(f, "{};", self.sql)
    }
}

/// The stages of an extraction, in execution order, ending with the results
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    dialect: String,
    stages: Vec<Stage>,
    results: String,
    columns: Vec<(String, DataType)>,
}

impl Plan {
    pub fn new<S: Into<String>, T: Into<String>>(
        dialect: S,
        stages: Vec<Stage>,
        results: T,
        columns: Vec<(String, DataType)>,
    ) -> Self {
        Plan {
            dialect: dialect.into(),
            stages,
            results: results.into(),
            columns,
        }
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The name of the object holding one row per patient
    pub fn results(&self) -> &str {
        &self.results
    }

    /// Output columns and their types, `patient_id` first
    pub fn columns(&self) -> &[(String, DataType)] {
        &self.columns
    }

    pub fn header(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Statements dropping intermediate results, last created first
    pub fn teardown(&self) -> Vec<&str> {
        self.stages.iter().rev().filter_map(Stage::teardown).collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} ({} stages)",
            "Plan for".bold(),
            self.dialect.bold().blue(),
            self.stages.len()
        )?;
        for stage in &self.stages {
            writeln!(f, "{stage}")?;
        }
        let teardown = self.teardown();
        if !teardown.is_empty() {
            writeln!(f, "{} {}", "--".dimmed(), "teardown".bold().red())?;
            for statement in teardown {
                writeln!(f, "{statement};")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dialect::Materialization,
        sql::{self, SelectBuilder},
    };

    #[test]
    fn test_teardown_order() {
        let stage = |name: &str| {
            let object = ast::ObjectName(vec![ast::Ident::new(name)]);
            let t = ast::ObjectName(vec![ast::Ident::new("t")]);
            let query = SelectBuilder::new(sql::table(t, None)).build();
            Stage::new(
                format!("compute {name}"),
                Statement::new(
                    name,
                    Materialization::TemporaryTable,
                    sql::create_table_as(object.clone(), true, query),
                ),
                Some(sql::drop_table(object)),
            )
        };
        let plan = Plan::new(
            "sqlite",
            vec![stage("a"), stage("b"), stage("c")],
            "c",
            vec![("patient_id".to_string(), DataType::Integer)],
        );
        println!("{plan}");
        assert_eq!(plan.teardown(), vec!["DROP TABLE c", "DROP TABLE b", "DROP TABLE a"]);
        assert_eq!(plan.header(), vec!["patient_id"]);
        assert_eq!(plan.stages()[1].purpose(), "compute b");
        assert_eq!(plan.stages()[1].sql(), "CREATE TEMPORARY TABLE b AS SELECT * FROM t");
    }
}
