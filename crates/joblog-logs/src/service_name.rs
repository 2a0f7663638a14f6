/// Service and module decoded from a job's service-name field.
///
/// Records written before v1.10 carry only the service module; newer ones
/// carry `<module>_<service>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceName {
    /// The caller named the module explicitly
    Explicit { service: String, module: String },
    /// Single-field format: the whole value is the module
    Legacy { module: String },
    /// `<module>_<service>`
    Versioned { module: String, service: String },
    /// Neither format matched
    Unknown,
}

impl ServiceName {
    /// Decode `full_name`, preferring an explicit `module` when non-empty
    pub fn parse(full_name: &str, module: &str) -> Self {
        if !module.is_empty() {
            let prefix = format!("{}_", module);
            let service = full_name.strip_prefix(&prefix).unwrap_or(full_name);
            return Self::Explicit {
                service: service.to_string(),
                module: module.to_string(),
            };
        }

        let parts: Vec<&str> = full_name.split('_').collect();
        match parts.as_slice() {
            [module] => Self::Legacy {
                module: module.to_string(),
            },
            [module, service] => Self::Versioned {
                module: module.to_string(),
                service: service.to_string(),
            },
            _ => Self::Unknown,
        }
    }

    /// `(service, module)`, empty where the format carries no value
    pub fn into_parts(self) -> (String, String) {
        match self {
            Self::Explicit { service, module } | Self::Versioned { module, service } => {
                (service, module)
            }
            Self::Legacy { module } => (String::new(), module),
            Self::Unknown => (String::new(), String::new()),
        }
    }
}
