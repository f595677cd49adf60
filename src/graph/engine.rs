// Eager reverse-mode autodiff engine. A graph is built fresh for every
// forward/backward pass and dropped at its end; dropping it releases every
// intermediate tensor of the pass at once.

use crate::ops;
use crate::ops::Operator;
use crate::tensor::Tensor;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic auto-incrementing id for all nodes.
static NODE_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn new() -> Self {
        Self(NODE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A node is always evaluated: leaves carry their tensor directly, computed
/// nodes also keep the operator and input ids for the backward pass.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub tensor: Tensor,
    pub op: Option<Box<dyn Operator>>,
    pub inputs: Vec<NodeId>,
    pub requires_grad: bool,
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    gradients: HashMap<NodeId, Tensor>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            gradients: HashMap::new(),
        }
    }

    /// Create a leaf node.
    pub fn create_variable(&mut self, tensor: Tensor, requires_grad: bool) -> NodeId {
        let node = Node {
            id: NodeId::new(),
            tensor,
            op: None,
            inputs: Vec::new(),
            requires_grad,
        };
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Leaf node that never needs a gradient (weights, reference images,
    /// basis matrices).
    pub fn constant(&mut self, tensor: Tensor) -> NodeId {
        self.create_variable(tensor, false)
    }

    pub fn tensor_from_vec(
        &mut self,
        data: Vec<f32>,
        shape: &[usize],
        requires_grad: bool,
    ) -> Result<NodeId, String> {
        let tensor = Tensor::from_vec(data, shape)?;
        Ok(self.create_variable(tensor, requires_grad))
    }

    pub fn get_tensor(&self, id: NodeId) -> Option<&Tensor> {
        self.nodes.get(&id).map(|n| &n.tensor)
    }

    pub fn value(&self, id: NodeId) -> Result<&Tensor, String> {
        self.get_tensor(id)
            .ok_or_else(|| format!("node {} not found", id.0))
    }

    pub fn get_gradient(&self, id: NodeId) -> Option<&Tensor> {
        self.gradients.get(&id)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn zero_gradients(&mut self) {
        self.gradients.clear();
    }

    /// Apply an operator eagerly, storing the evaluated result.
    pub fn apply_operation(
        &mut self,
        op: Box<dyn Operator>,
        input_ids: Vec<NodeId>,
    ) -> Result<NodeId, String> {
        if input_ids.len() != op.num_inputs() {
            return Err(format!(
                "operation {} expects {} inputs, got {}",
                op.name(),
                op.num_inputs(),
                input_ids.len()
            ));
        }
        let inputs: Result<Vec<&Tensor>, String> = input_ids
            .iter()
            .map(|&id| {
                self.get_tensor(id)
                    .ok_or_else(|| format!("input node {} not found", id.0))
            })
            .collect();
        let result = op.compute(&inputs?)?;
        let node = Node {
            id: NodeId::new(),
            tensor: result,
            op: Some(op),
            inputs: input_ids,
            requires_grad: true,
        };
        let id = node.id;
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn accumulate_gradient(&mut self, id: NodeId, grad: Tensor) -> Result<(), String> {
        match self.gradients.remove(&id) {
            Some(existing) => {
                let accumulated = existing.add(&grad)?;
                self.gradients.insert(id, accumulated);
            }
            None => {
                self.gradients.insert(id, grad);
            }
        }
        Ok(())
    }

    /// Reverse-mode gradient propagation from a scalar loss node.
    pub fn backward(&mut self, loss_id: NodeId) -> Result<(), String> {
        let loss = self.value(loss_id)?;
        let seed = Tensor::full(loss.shape(), 1.0);
        self.gradients.insert(loss_id, seed);

        let mut visited = HashSet::new();
        let mut topo_order = Vec::new();
        self.topological_sort(loss_id, &mut visited, &mut topo_order);
        topo_order.reverse();

        for &node_id in &topo_order {
            self.backward_node(node_id)?;
        }
        Ok(())
    }

    fn backward_node(&mut self, node_id: NodeId) -> Result<(), String> {
        let Some(grad_output) = self.gradients.remove(&node_id) else {
            return Ok(());
        };

        let (op, input_ids) = {
            let node = self
                .nodes
                .get(&node_id)
                .ok_or_else(|| format!("node {} not found", node_id.0))?;
            match &node.op {
                // Leaf: the gradient stops here.
                None => {
                    self.gradients.insert(node_id, grad_output);
                    return Ok(());
                }
                Some(op) => (op.clone_op(), node.inputs.clone()),
            }
        };

        let input_grads = {
            let inputs: Result<Vec<&Tensor>, String> = input_ids
                .iter()
                .map(|&id| {
                    self.get_tensor(id)
                        .ok_or_else(|| format!("input node {} not found", id.0))
                })
                .collect();
            let inputs = inputs?;
            let output = self.value(node_id)?;
            op.gradient(&grad_output, &inputs, output)?
        };

        for (input_id, input_grad) in input_ids.iter().zip(input_grads) {
            self.accumulate_gradient(*input_id, input_grad)?;
        }
        Ok(())
    }

    fn topological_sort(
        &self,
        node_id: NodeId,
        visited: &mut HashSet<NodeId>,
        topo_order: &mut Vec<NodeId>,
    ) {
        if !visited.insert(node_id) {
            return;
        }
        if let Some(node) = self.nodes.get(&node_id) {
            for &input_id in &node.inputs {
                self.topological_sort(input_id, visited, topo_order);
            }
        }
        topo_order.push(node_id);
    }
}

// Convenience builders wrapping the operator set.
impl Graph {
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Add), vec![a, b])
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Sub), vec![a, b])
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Mul), vec![a, b])
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Div), vec![a, b])
    }

    pub fn add_scalar(&mut self, a: NodeId, scalar: f32) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::AddScalar { scalar }), vec![a])
    }

    pub fn mul_scalar(&mut self, a: NodeId, scalar: f32) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::MulScalar { scalar }), vec![a])
    }

    pub fn power_scalar(&mut self, a: NodeId, exponent: f32) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::PowerScalar { exponent }), vec![a])
    }

    pub fn neg(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Neg), vec![a])
    }

    pub fn abs(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Abs), vec![a])
    }

    pub fn sigmoid(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Sigmoid), vec![a])
    }

    pub fn relu(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::ReLU), vec![a])
    }

    pub fn matmul(
        &mut self,
        a: NodeId,
        b: NodeId,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::MatMul {
                transpose_a,
                transpose_b,
            }),
            vec![a, b],
        )
    }

    pub fn summation(&mut self, a: NodeId, axes: Option<Vec<usize>>) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Sum { axes }), vec![a])
    }

    pub fn mean(&mut self, a: NodeId, axes: Option<Vec<usize>>) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Mean { axes }), vec![a])
    }

    pub fn max_global(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::MaxGlobal), vec![a])
    }

    pub fn softmax(&mut self, a: NodeId) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Softmax), vec![a])
    }

    pub fn reshape(&mut self, a: NodeId, shape: &[usize]) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::Reshape {
                shape: shape.to_vec(),
            }),
            vec![a],
        )
    }

    pub fn transpose(&mut self, a: NodeId, perm: &[usize]) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::Transpose {
                perm: perm.to_vec(),
            }),
            vec![a],
        )
    }

    pub fn slice(&mut self, a: NodeId, begin: &[usize], size: &[usize]) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::Slice {
                begin: begin.to_vec(),
                size: size.to_vec(),
            }),
            vec![a],
        )
    }

    pub fn concat(&mut self, a: NodeId, b: NodeId, axis: usize) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::Concat { axis }), vec![a, b])
    }

    pub fn resize_bilinear(
        &mut self,
        a: NodeId,
        height: usize,
        width: usize,
        align_corners: bool,
    ) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::ResizeBilinear {
                height,
                width,
                align_corners,
            }),
            vec![a],
        )
    }

    pub fn conv2d(
        &mut self,
        input: NodeId,
        filter: NodeId,
        bias: NodeId,
        stride: (usize, usize),
        padding: ops::Padding,
    ) -> Result<NodeId, String> {
        self.apply_operation(
            Box::new(ops::Conv2D { stride, padding }),
            vec![input, filter, bias],
        )
    }

    pub fn max_pool2d(
        &mut self,
        input: NodeId,
        pool: (usize, usize),
        stride: (usize, usize),
    ) -> Result<NodeId, String> {
        self.apply_operation(Box::new(ops::MaxPool2D { pool, stride }), vec![input])
    }
}
