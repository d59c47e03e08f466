//! System prompt for the documentation agent.

use crate::error::{Error, Result};

use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = r#"You are a documentation assistant with access to ONLY these documents:
{% for collection in collections %}{{ loop.index }}. {{ collection }}
{% endfor %}
Rules:
- You MUST call the {{ tool_name }} tool before every answer.
- Answer ONLY from what {{ tool_name }} returns. Never fill gaps with general knowledge.
- If the results are not relevant, reply exactly: "{{ no_documentation }}"
- Never discuss {{ denied_topics | join(", ") }} or any technology outside the documents above.
- Always cite which documentation your answer comes from ({{ labels | join("/") }}).

Before answering:
1. Call {{ tool_name }} with a focused query.
2. Check whether the returned passages actually answer the question.
3. If they do not, admit you do not have that information."#;

/// Render the system prompt.
pub fn system_prompt(
    tool_name: &str,
    denied_topics: &[String],
    no_documentation: &str,
) -> Result<String> {
    let mut environment = Environment::new();
    environment
        .add_template("system", SYSTEM_TEMPLATE)
        .map_err(template_error)?;

    let template = environment.get_template("system").map_err(template_error)?;
    template
        .render(context! {
            collections => [
                "Apache Spark SQL documentation",
                "dbt (data build tool) documentation",
                "Apache Airflow DAGs documentation",
            ],
            labels => ["Spark", "dbt", "Airflow"],
            tool_name => tool_name,
            denied_topics => denied_topics,
            no_documentation => no_documentation,
        })
        .map_err(template_error)
}

fn template_error(error: minijinja::Error) -> Error {
    Error::Other(anyhow::anyhow!("failed to render system prompt: {error}"))
}
