use std::collections::HashMap;
use std::sync::Arc;

use ads::{AdsError, Client, DecodeError, IndexGroup, IndexOffset, PrimitiveType, SymbolInfo, Value};

use crate::{ErrorKind, Result, SessionLogger};

/// Where a configured symbol lives in the PLC and how to decode it.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolBinding {
    /// The name as configured, which may differ in case from the PLC's own spelling.
    pub name: String,
    pub index_group: IndexGroup,
    pub index_offset: IndexOffset,
    pub size: u32,
    /// `None` for structured, array or otherwise unsupported types.
    pub primitive: Option<PrimitiveType>,
    pub type_name: String,
    pub comment: String,
}

impl SymbolBinding {
    pub fn new(name: &str, info: SymbolInfo) -> Self {
        SymbolBinding {
            name: name.to_owned(),
            index_group: info.index_group,
            index_offset: info.index_offset,
            size: info.size,
            primitive: PrimitiveType::resolve(&info.type_name, info.data_type),
            type_name: info.type_name,
            comment: info.comment,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, DecodeError> {
        match self.primitive {
            Some(primitive) => primitive.decode(bytes),
            None => Err(DecodeError::Unsupported(self.type_name.clone())),
        }
    }
}

/// Resolves symbol names to bindings, asking the PLC at most once per name.
pub struct SymbolResolver<'a> {
    client: &'a Client,
    logger: &'a SessionLogger,
    cache: HashMap<String, Arc<SymbolBinding>>,
}

impl<'a> SymbolResolver<'a> {
    pub fn new(client: &'a Client, logger: &'a SessionLogger) -> Self {
        SymbolResolver {
            client,
            logger,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, name: &str) -> Result<Arc<SymbolBinding>> {
        if let Some(binding) = self.cache.get(name) {
            return Ok(binding.clone());
        }

        let info = match self.client.symbol_info(name).await {
            Ok(info) => info,
            Err(error) if error.ads_error() == Some(AdsError::SYMBOL_NOT_FOUND) => {
                return Err(ErrorKind::UnknownSymbol(name.to_owned()).into());
            }
            Err(error) => return Err(error.into()),
        };

        let binding = Arc::new(SymbolBinding::new(name, info));
        session_log!(
            self.logger,
            Debug,
            "resolved {} to {:#x}:{:#x} ({} bytes, {}) {}",
            binding.name,
            binding.index_group,
            binding.index_offset,
            binding.size,
            binding.type_name,
            binding.comment
        );
        if binding.primitive.is_none() {
            session_log!(
                self.logger,
                Warn,
                "symbol {} has unsupported type {}; its values will be dropped",
                binding.name,
                binding.type_name
            );
        }

        self.cache.insert(name.to_owned(), binding.clone());
        Ok(binding)
    }

    /// Resolves every name in order, stopping at the first failure.
    pub async fn resolve_all<I, S>(&mut self, names: I) -> Result<Vec<Arc<SymbolBinding>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bindings = Vec::new();
        for name in names {
            bindings.push(self.resolve(name.as_ref()).await?);
        }
        Ok(bindings)
    }
}

#[cfg(test)]
pub(crate) fn binding(name: &str, primitive: PrimitiveType, size: u32) -> SymbolBinding {
    SymbolBinding {
        name: name.to_owned(),
        index_group: ads::index::PLC_RW_M,
        index_offset: 0,
        size,
        primitive: Some(primitive),
        type_name: primitive.to_string(),
        comment: String::new(),
    }
}
