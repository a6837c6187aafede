use std::collections::HashMap;

use koopa::ir::Value;

/// 栈帧管理器
///
/// 每个函数重置一次。布局从低到高：
///
/// ```text
/// +--------------------+ <- sp + rounded_size()
/// |   saved ra (4B)    |
/// +--------------------+ <- offset_upper()
/// |   指令结果槽        |    扫描时首见顺序分配
/// +--------------------+ <- offset_lower() + lower
/// |   出参区            |    仅当某次调用实参超过 8 个
/// +--------------------+ <- sp
/// ```
pub struct StackFrameManager {
    /// 低地址额外空间，容纳第 9 个及之后的调用实参
    lower: i32,
    /// 高地址额外空间，保存返回地址
    upper: i32,
    /// 槽偏移的前缀和，最后一项是槽区总大小
    offsets: Vec<i32>,
    value_to_index: HashMap<Value, usize>,
}

impl StackFrameManager {
    pub fn new() -> Self {
        Self {
            lower: 0,
            upper: 0,
            offsets: vec![0],
            value_to_index: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.lower = 0;
        self.upper = 0;
        self.offsets.clear();
        self.offsets.push(0);
        self.value_to_index.clear();
    }

    /// 给一个指令结果分配槽位，重复分配被忽略
    pub fn alloc(&mut self, value: Value, size: i32) {
        if self.value_to_index.contains_key(&value) {
            return;
        }
        self.value_to_index.insert(value, self.offsets.len() - 1);
        let last = *self.offsets.last().unwrap_or(&0);
        self.offsets.push(last + size);
    }

    pub fn alloc_lower(&mut self, size: i32) {
        self.lower = size;
    }

    pub fn alloc_upper(&mut self, size: i32) {
        self.upper = size;
    }

    /// 相对 sp 的槽偏移
    pub fn offset(&self, value: Value) -> Option<i32> {
        self.value_to_index
            .get(&value)
            .map(|&idx| self.lower + self.offsets[idx])
    }

    /// 出参区起点，总在栈帧最低处
    pub fn offset_lower(&self) -> i32 {
        0
    }

    /// ra 保存槽的偏移
    pub fn offset_upper(&self) -> i32 {
        self.lower + self.offsets.last().copied().unwrap_or(0)
    }

    pub fn size(&self) -> i32 {
        self.lower + self.offsets.last().copied().unwrap_or(0) + self.upper
    }

    /// 栈帧大小向上取整到 16 字节
    pub fn rounded_size(&self) -> i32 {
        (self.size() + 15) / 16 * 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koopa::ir::builder_traits::*;
    use koopa::ir::{FunctionData, Type};

    fn dummy_values(n: usize) -> Vec<Value> {
        let mut program = koopa::ir::Program::new();
        let f = program.new_func(FunctionData::new(
            "@frame_test".to_string(),
            vec![],
            Type::get_unit(),
        ));
        let dfg = program.func_mut(f).dfg_mut();
        (0..n).map(|_| dfg.new_value().alloc(Type::get_i32())).collect()
    }

    #[test]
    fn slots_are_allocated_in_first_seen_order() {
        let values = dummy_values(3);
        let mut sfm = StackFrameManager::new();
        sfm.alloc(values[0], 4);
        sfm.alloc(values[1], 12);
        sfm.alloc(values[2], 4);
        assert_eq!(sfm.offset(values[0]), Some(0));
        assert_eq!(sfm.offset(values[1]), Some(4));
        assert_eq!(sfm.offset(values[2]), Some(16));
        // 重复分配不挪位置
        sfm.alloc(values[1], 4);
        assert_eq!(sfm.offset(values[1]), Some(4));
    }

    #[test]
    fn lower_area_shifts_slot_offsets() {
        let values = dummy_values(2);
        let mut sfm = StackFrameManager::new();
        sfm.alloc_upper(4);
        sfm.alloc(values[0], 4);
        sfm.alloc(values[1], 4);
        sfm.alloc_lower(8);
        assert_eq!(sfm.offset_lower(), 0);
        assert_eq!(sfm.offset(values[0]), Some(8));
        assert_eq!(sfm.offset(values[1]), Some(12));
        assert_eq!(sfm.offset_upper(), 16);
        assert_eq!(sfm.size(), 20);
        assert_eq!(sfm.rounded_size(), 32);
    }

    #[test]
    fn rounded_size_is_a_multiple_of_16() {
        let values = dummy_values(1);
        let mut sfm = StackFrameManager::new();
        sfm.alloc_upper(4);
        sfm.alloc(values[0], 4);
        assert_eq!(sfm.rounded_size() % 16, 0);
        assert_eq!(sfm.rounded_size(), 16);
    }

    #[test]
    fn missing_value_has_no_offset() {
        let values = dummy_values(1);
        let sfm = StackFrameManager::new();
        assert_eq!(sfm.offset(values[0]), None);
    }
}
