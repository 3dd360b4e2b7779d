use minijinja::{Environment, UndefinedBehavior};
use std::collections::{BTreeMap, BTreeSet};

/// A minijinja template; every variable it reads must be supplied.
#[derive(Clone, Debug)]
pub struct JinjaTemplate {
    source: String,
}

impl JinjaTemplate {
    pub fn new(source: String) -> Self {
        Self { source }
    }

    fn environment(&self) -> Result<Environment<'_>, minijinja::Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_template("job", self.source.as_str())?;
        Ok(env)
    }

    pub fn placeholders(&self) -> Result<BTreeSet<String>, minijinja::Error> {
        let env = self.environment()?;
        let template = env.get_template("job")?;
        Ok(template.undeclared_variables(false).into_iter().collect())
    }

    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, minijinja::Error> {
        let env = self.environment()?;
        let template = env.get_template("job")?;
        template.render(minijinja::Value::from_serialize(values))
    }
}
