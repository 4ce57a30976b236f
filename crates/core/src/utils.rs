use uuid::Uuid;

/// 生成实体ID（32位十六进制，不含连字符）
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 生成短ID，用于节点标识
pub fn new_short_id() -> String {
    let id = new_id();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_sized() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(new_short_id().len(), 12);
    }
}
