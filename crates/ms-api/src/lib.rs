#![forbid(unsafe_code)]

use ms_algebra::{AlgebraError, LoadMode, LoadReport, Operand, ParamVector, Reconstructible};
use ms_core::ExecutionMode;
use ms_kernel_cpu::BinaryOp;
use ms_runtime::{EvidenceEntry, EvidenceKind, RuntimeContext};

/// Front door for collection algebra. Every call is recorded in the runtime
/// evidence ledger, accepted or rejected.
#[derive(Debug, Clone)]
pub struct AlgebraSession {
    runtime: RuntimeContext,
}

impl AlgebraSession {
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            runtime: RuntimeContext::new(mode),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.runtime.mode()
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.runtime.set_mode(mode);
    }

    #[must_use]
    pub fn load_mode(&self) -> LoadMode {
        load_mode_for(self.mode())
    }

    pub fn wrap<M: Reconstructible>(&mut self, container: &M) -> ParamVector<M> {
        let out = ParamVector::wrap(container);
        let summary = format!(
            "op=wrap keys={} numel={} mode={:?} outcome=ok",
            out.len(),
            out.numel(),
            self.mode()
        );
        self.runtime
            .ledger_mut()
            .record(EvidenceKind::Algebra, summary);
        out
    }

    pub fn add<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: impl Into<Operand<'a, M>>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        self.binary(lhs, rhs.into(), BinaryOp::Add)
    }

    pub fn sub<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: impl Into<Operand<'a, M>>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        self.binary(lhs, rhs.into(), BinaryOp::Sub)
    }

    pub fn mul<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: impl Into<Operand<'a, M>>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        self.binary(lhs, rhs.into(), BinaryOp::Mul)
    }

    pub fn div<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: impl Into<Operand<'a, M>>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        self.binary(lhs, rhs.into(), BinaryOp::Div)
    }

    pub fn pow<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        exponent: impl Into<Operand<'a, M>>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        self.binary(lhs, exponent.into(), BinaryOp::Pow)
    }

    pub fn inner<'a, M: Reconstructible + 'a>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: impl Into<Operand<'a, M>>,
    ) -> Result<f64, AlgebraError> {
        let rhs = rhs.into();
        let operand = rhs.type_name();
        let result = lhs.inner(rhs);
        self.finish_reduction("@", &operand, lhs, result)
    }

    pub fn norm<M: Reconstructible>(&mut self, value: &ParamVector<M>) -> f64 {
        let out = value.norm();
        let summary = format!(
            "op=norm keys={} numel={} mode={:?} outcome=ok value={out}",
            value.len(),
            value.numel(),
            self.mode()
        );
        self.runtime
            .ledger_mut()
            .record(EvidenceKind::Reduction, summary);
        out
    }

    pub fn distance<M: Reconstructible>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: &ParamVector<M>,
    ) -> Result<f64, AlgebraError> {
        let result = lhs.distance(rhs);
        self.finish_reduction("distance", &ParamVector::<M>::type_label(), lhs, result)
    }

    pub fn cosine_similarity<M: Reconstructible>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: &ParamVector<M>,
    ) -> Result<f64, AlgebraError> {
        let result = lhs.cosine_similarity(rhs);
        self.finish_reduction("cosine", &ParamVector::<M>::type_label(), lhs, result)
    }

    pub fn lerp<M: Reconstructible>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: &ParamVector<M>,
        t: f64,
    ) -> Result<ParamVector<M>, AlgebraError> {
        let result = lhs.lerp(rhs, t);
        self.finish_algebra("lerp", &ParamVector::<M>::type_label(), result)
    }

    pub fn mean<M: Reconstructible>(
        &mut self,
        items: &[&ParamVector<M>],
    ) -> Result<ParamVector<M>, AlgebraError> {
        let result = ParamVector::mean(items);
        self.finish_algebra(
            "mean",
            &format!("{}x{}", items.len(), ParamVector::<M>::type_label()),
            result,
        )
    }

    pub fn weighted_sum<M: Reconstructible>(
        &mut self,
        terms: &[(f64, &ParamVector<M>)],
    ) -> Result<ParamVector<M>, AlgebraError> {
        let result = ParamVector::weighted_sum(terms);
        self.finish_algebra(
            "weighted_sum",
            &format!("{}x{}", terms.len(), ParamVector::<M>::type_label()),
            result,
        )
    }

    /// Rebuilds a container under the load policy of the current mode.
    pub fn materialize<M: Reconstructible>(
        &mut self,
        value: &ParamVector<M>,
    ) -> Result<(M, LoadReport), AlgebraError> {
        let load_mode = self.load_mode();
        let mode = self.mode();
        match value.materialize(load_mode) {
            Ok((container, report)) => {
                let summary = format!(
                    "op=materialize target={} load={load_mode:?} loaded={} missing={} unexpected={} mode={mode:?} outcome=ok",
                    value.description(),
                    report.loaded_keys,
                    report.missing_keys.len(),
                    report.unexpected_keys.len(),
                );
                self.runtime
                    .ledger_mut()
                    .record(EvidenceKind::Materialize, summary);
                Ok((container, report))
            }
            Err(error) => {
                self.runtime
                    .record_rejection(EvidenceKind::Materialize, "materialize", &error);
                Err(error)
            }
        }
    }

    #[must_use]
    pub fn evidence(&self) -> &[EvidenceEntry] {
        self.runtime.ledger().entries()
    }

    #[must_use]
    pub fn evidence_len(&self) -> usize {
        self.runtime.ledger().len()
    }

    fn binary<M: Reconstructible>(
        &mut self,
        lhs: &ParamVector<M>,
        rhs: Operand<'_, M>,
        op: BinaryOp,
    ) -> Result<ParamVector<M>, AlgebraError> {
        let operand = rhs.type_name();
        let result = match op {
            BinaryOp::Add => lhs.add(rhs),
            BinaryOp::Sub => lhs.sub(rhs),
            BinaryOp::Mul => lhs.mul(rhs),
            BinaryOp::Div => lhs.div(rhs),
            BinaryOp::Pow => lhs.pow(rhs),
        };
        self.finish_algebra(op.symbol(), &operand, result)
    }

    fn finish_algebra<M: Reconstructible>(
        &mut self,
        op: &str,
        operand: &str,
        result: Result<ParamVector<M>, AlgebraError>,
    ) -> Result<ParamVector<M>, AlgebraError> {
        match &result {
            Ok(out) => {
                let summary = format!(
                    "op={op} operand={operand} keys={} numel={} mode={:?} outcome=ok",
                    out.len(),
                    out.numel(),
                    self.mode()
                );
                self.runtime
                    .ledger_mut()
                    .record(EvidenceKind::Algebra, summary);
            }
            Err(error) => self
                .runtime
                .record_rejection(EvidenceKind::Algebra, op, error),
        }
        result
    }

    fn finish_reduction<M: Reconstructible>(
        &mut self,
        op: &str,
        operand: &str,
        lhs: &ParamVector<M>,
        result: Result<f64, AlgebraError>,
    ) -> Result<f64, AlgebraError> {
        match &result {
            Ok(value) => {
                let summary = format!(
                    "op={op} operand={operand} keys={} numel={} mode={:?} outcome=ok value={value}",
                    lhs.len(),
                    lhs.numel(),
                    self.mode()
                );
                self.runtime
                    .ledger_mut()
                    .record(EvidenceKind::Reduction, summary);
            }
            Err(error) => self
                .runtime
                .record_rejection(EvidenceKind::Reduction, op, error),
        }
        result
    }
}

#[must_use]
pub fn load_mode_for(mode: ExecutionMode) -> LoadMode {
    match mode {
        ExecutionMode::Strict => LoadMode::Strict,
        ExecutionMode::Hardened => LoadMode::Hardened,
    }
}

pub use ms_algebra::{
    AlgebraError as ModelAlgebraError, LoadReport as ModelLoadReport,
    ParamVector as ModelParamVector,
};

#[cfg(test)]
mod tests {
    use ms_algebra::{AlgebraError, LoadMode, ParamVector};
    use ms_core::{DType, DenseTensor, ExecutionMode};
    use ms_nn::{Linear, LinearConfig, Sequential};
    use ms_runtime::EvidenceKind;

    use super::{AlgebraSession, load_mode_for};

    fn layer(bias: bool, seed: u64) -> Linear {
        Linear::new(LinearConfig::new(2, 3, bias), seed).expect("layer should build")
    }

    #[test]
    fn session_add_records_algebra_evidence() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&layer(true, 1));
        let out = session.add(&a, 1.0).expect("scalar add should succeed");

        assert_eq!(out.numel(), 9);
        let last = session.evidence().last().expect("evidence entry");
        assert_eq!(last.kind, EvidenceKind::Algebra);
        assert_eq!(
            last.summary,
            "op=+ operand=scalar keys=2 numel=9 mode=Strict outcome=ok"
        );
        assert_eq!(session.evidence_len(), 3);
    }

    #[test]
    fn rejected_operation_is_recorded_and_returned() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&layer(true, 1));
        let err = session.add(&a, "1").expect_err("string operand must fail");

        assert!(matches!(err, AlgebraError::UnsupportedOperand { op: "+", .. }));
        let last = session.evidence().last().expect("evidence entry");
        assert!(last.summary.starts_with("op=+ mode=Strict outcome=rejected"));
    }

    #[test]
    fn pow_rejects_collection_exponent() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&layer(false, 1));
        let b = session.wrap(&layer(false, 2));
        let err = session.pow(&a, &b).expect_err("collection exponent is unsupported");
        assert!(matches!(err, AlgebraError::UnsupportedOperand { op: "**", .. }));

        let squared = session.pow(&a, 2).expect("scalar exponent is supported");
        let weight = a.get("weight").expect("weight");
        assert_eq!(
            squared.get("weight").expect("weight").values()[0],
            weight.values()[0].powf(2.0)
        );
    }

    #[test]
    fn reductions_record_value() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let weight = DenseTensor::new(vec![1.0, 2.0, 2.0, 0.0, 0.0, 0.0], vec![3, 2], DType::F64)
            .expect("weight");
        let bias = DenseTensor::zeros(vec![3], DType::F64).expect("bias");
        let a = session.wrap(&Linear::from_tensors(weight, Some(bias)).expect("layer"));

        assert_eq!(session.norm(&a), 3.0);
        assert_eq!(session.inner(&a, &a).expect("self inner"), 9.0);
        let reductions: Vec<_> = session
            .evidence()
            .iter()
            .filter(|entry| entry.kind == EvidenceKind::Reduction)
            .collect();
        assert_eq!(reductions.len(), 2);
        assert!(reductions[0].summary.ends_with("value=3"));
        assert!(reductions[1].summary.starts_with("op=@ operand=ParamVector<Linear>"));
    }

    #[test]
    fn inner_with_scalar_is_rejected() {
        let mut session = AlgebraSession::new(ExecutionMode::Hardened);
        let a = session.wrap(&layer(true, 4));
        let err = session.inner(&a, 2.0).expect_err("inner needs a collection");
        assert!(matches!(err, AlgebraError::UnsupportedOperand { op: "@", .. }));
        assert_eq!(
            session.evidence().last().expect("entry").kind,
            EvidenceKind::Reduction
        );
    }

    #[test]
    fn materialize_follows_session_mode() {
        let mut session = AlgebraSession::new(ExecutionMode::Hardened);
        let a = session.wrap(&layer(true, 1));
        let b = session.wrap(&layer(true, 2));
        let avg = session.mean(&[&a, &b]).expect("mean should succeed");

        let (model, report) = session.materialize(&avg).expect("materialize");
        assert_eq!(report.loaded_keys, 2);
        assert_eq!(ParamVector::wrap(&model).tensors(), avg.tensors());
        let last = session.evidence().last().expect("entry");
        assert_eq!(last.kind, EvidenceKind::Materialize);
        assert!(last.summary.contains("load=Hardened"));
        assert!(last.summary.ends_with("mode=Hardened outcome=ok"));
    }

    #[test]
    fn state_dict_only_materialize_is_rejected() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&layer(true, 1));
        let detached = ParamVector::<Linear>::from_named_tensors(a.tensors().clone());

        let err = session
            .materialize(&detached)
            .expect_err("no container to rebuild");
        assert!(matches!(err, AlgebraError::NotReconstructible { .. }));
        assert!(
            session
                .evidence()
                .last()
                .expect("entry")
                .summary
                .contains("outcome=rejected")
        );
    }

    #[test]
    fn weighted_sum_and_lerp_agree() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&layer(true, 1));
        let b = session.wrap(&layer(true, 2));

        let mixed = session
            .weighted_sum(&[(0.5, &a), (0.5, &b)])
            .expect("weighted sum");
        let lerped = session.lerp(&a, &b, 0.5).expect("lerp");
        assert_eq!(mixed.tensors(), lerped.tensors());
    }

    #[test]
    fn sequential_models_distance_is_zero_against_self() {
        let mut model = Sequential::new();
        model.push(layer(true, 3));
        model.push(Linear::new(LinearConfig::new(3, 1, false), 4).expect("layer"));
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        let a = session.wrap(&model);
        assert_eq!(session.distance(&a, &a).expect("distance"), 0.0);
    }

    #[test]
    fn mode_switch_changes_load_policy() {
        let mut session = AlgebraSession::new(ExecutionMode::Strict);
        assert_eq!(session.load_mode(), LoadMode::Strict);
        session.set_mode(ExecutionMode::Hardened);
        assert_eq!(session.mode(), ExecutionMode::Hardened);
        assert_eq!(session.load_mode(), LoadMode::Hardened);
        assert_eq!(load_mode_for(ExecutionMode::Strict), LoadMode::Strict);
    }
}
