//! Message localization

pub mod messages;

use std::collections::HashMap;

pub const DEFAULT_LOCALE: &str = "en";

/// Renders a message key in a locale
pub trait MessageFormatter: Send + Sync {
    fn translate(&self, locale: &str, key: &str, vars: &[(&str, String)]) -> String;
}

/// Replace `%(name)s` placeholders in one pass over the template, so
/// substituted values are never expanded again. Unknown placeholders are left
/// as-is.
pub fn interpolate(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let value = tail[2..].find(")s").and_then(|end| {
            let name = &tail[2..2 + end];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (value, 2 + end + 2))
        });
        match value {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push_str("%(");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

const PT: &[(&str, &str)] = &[
    (
        "Running job for deployment %(id)s",
        "Executando tarefa para a implantação %(id)s",
    ),
    (
        "Successfully deployed as a service (port=%(port)s)",
        "Implantado com sucesso como um serviço (porta=%(port)s)",
    ),
    (
        "Successfully deleted deployment.",
        "Implantação removida com sucesso.",
    ),
    ("%(kind)s %(name)s not found.", "%(kind)s %(name)s não encontrado."),
    ("%(kind)s %(name)s already exists.", "%(kind)s %(name)s já existe."),
    ("Error in deployment: %(error)s", "Erro na implantação: %(error)s"),
    (
        "Deployment information with id=%(id)s not found",
        "Informação de implantação com id=%(id)s não encontrada",
    ),
    (
        "Deployment target %(type)s not supported",
        "Destino de implantação %(type)s não suportado",
    ),
    (
        "No authentication info configured in deployment target",
        "Nenhuma informação de autenticação configurada no destino de implantação",
    ),
    (
        "Job for deployment %(id)s expired before it could run",
        "A tarefa da implantação %(id)s expirou antes de ser executada",
    ),
];

/// Built-in catalog; keys are the English templates
pub struct Catalog {
    locales: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let mut locales = HashMap::new();
        locales.insert("pt", PT.iter().copied().collect());
        Self { locales }
    }

    pub fn supports(&self, locale: &str) -> bool {
        locale == DEFAULT_LOCALE || self.locales.contains_key(language(locale))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// `pt_BR` / `pt-BR` -> `pt`
fn language(locale: &str) -> &str {
    locale.split(['_', '-']).next().unwrap_or(locale)
}

impl MessageFormatter for Catalog {
    fn translate(&self, locale: &str, key: &str, vars: &[(&str, String)]) -> String {
        let template = self
            .locales
            .get(language(locale))
            .and_then(|entries| entries.get(key))
            .copied()
            .unwrap_or(key);
        interpolate(template, vars)
    }
}
