use thiserror::Error;

/// A failed call to the backend, as seen by the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached at all.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with an error body.
    #[error("{message} ({code})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("no active session")]
    NotAuthenticated,

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            Self::NotAuthenticated => Some("unauthorized"),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("not signed in")]
    NotSignedIn,

    #[error("not allowed")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// Automatic retries are exhausted; only a manual reload helps.
    #[error("backend unreachable")]
    Unreachable,
}

impl ClientError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_network())
    }

    /// Localized text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(e) => backend_message(e),
            Self::NotSignedIn => "Faça login para continuar.".into(),
            Self::Forbidden => "Você não tem permissão para esta ação.".into(),
            Self::NotFound => "Conteúdo não encontrado.".into(),
            Self::Validation(msg) => msg.clone(),
            Self::Unreachable => {
                "Não foi possível conectar ao servidor. Recarregue a página.".into()
            }
        }
    }
}

/// Localized text for a backend failure. Auth codes get specific wording.
pub fn backend_message(e: &BackendError) -> String {
    if e.is_network() {
        return "Sem conexão com o servidor. Verifique sua internet e tente novamente.".into();
    }
    match e.code() {
        Some("invalid_credentials") => "E-mail ou senha incorretos.".into(),
        Some("email_not_confirmed") => "Confirme seu e-mail antes de entrar.".into(),
        Some("account_inactive") => {
            "Sua assinatura está inativa. Fale com o suporte para reativar o acesso.".into()
        }
        Some("email_taken") => "Este e-mail já está cadastrado.".into(),
        Some("invalid_refresh_token") | Some("unauthorized") => {
            "Sua sessão expirou. Entre novamente.".into()
        }
        Some("forbidden") => "Você não tem permissão para esta ação.".into(),
        Some("not_found") => "Conteúdo não encontrado.".into(),
        Some("bad_request") => match e {
            BackendError::Api { message, .. } => format!("Dados inválidos: {}", message),
            _ => "Dados inválidos.".into(),
        },
        _ => "Algo deu errado. Tente novamente.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> BackendError {
        BackendError::Api {
            status,
            code: code.into(),
            message: "x".into(),
        }
    }

    #[test]
    fn auth_failures_are_localized() {
        assert_eq!(
            backend_message(&api(401, "invalid_credentials")),
            "E-mail ou senha incorretos."
        );
        assert!(backend_message(&api(403, "account_inactive")).contains("inativa"));
        assert!(backend_message(&BackendError::Network("down".into())).contains("conexão"));
    }

    #[test]
    fn only_transport_failures_count_as_network() {
        assert!(ClientError::from(BackendError::Network("x".into())).is_network());
        assert!(!ClientError::from(api(500, "internal")).is_network());
        assert!(api(404, "not_found").is_not_found());
    }
}
