// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

use alloy_transport::TransportError;
use courier_types::pool::MempoolError;

/// Result of a provider method
pub type ProviderResult<T> = Result<T, ProviderError>;

// Rate limiting, as returned by common node providers
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];

/// Error enumeration for the ChainClient trait
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport or JSON-RPC error
    #[error(transparent)]
    RPC(#[from] TransportError),
    /// Contract call error
    #[error(transparent)]
    Contract(#[from] alloy_contract::Error),
    /// Internal errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// True if the call may succeed when repeated unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RPC(e) => is_transient_transport(e),
            ProviderError::Contract(alloy_contract::Error::TransportError(e)) => {
                is_transient_transport(e)
            }
            _ => false,
        }
    }
}

fn is_transient_transport(e: &TransportError) -> bool {
    match e {
        TransportError::Transport(_) | TransportError::NullResp => true,
        TransportError::ErrorResp(resp) => RATE_LIMIT_CODES.contains(&resp.code),
        _ => false,
    }
}

impl From<ProviderError> for MempoolError {
    fn from(error: ProviderError) -> Self {
        if error.is_transient() {
            MempoolError::TransientChainError(error.to_string())
        } else {
            MempoolError::FatalChainError(error.to_string())
        }
    }
}
